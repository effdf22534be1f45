pub mod config;
pub mod id_map;
pub mod sync_state;
