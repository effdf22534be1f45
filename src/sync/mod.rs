pub mod google_api;
pub mod google_token;
pub mod groupware;
pub mod matcher;
pub mod policy;
pub mod reconcile;
pub mod store;
pub mod sync_engine;
