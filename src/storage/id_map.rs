use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IdMapError {
    #[error("Failed to access id table: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Line {line}: expected 'sourceId targetId', found '{content}'")]
    Malformed { line: usize, content: String },
}

/// Source id to target id correspondence, one `sourceId targetId` pair per line.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IdMap {
    entries: BTreeMap<String, String>,
}

impl IdMap {
    pub fn parse(content: &str) -> Result<Self, IdMapError> {
        let mut entries = BTreeMap::new();
        for (index, raw) in content.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut fields = line.split_whitespace();
            match (fields.next(), fields.next(), fields.next()) {
                (Some(source), Some(target), None) => {
                    entries.insert(source.to_string(), target.to_string());
                }
                _ => {
                    return Err(IdMapError::Malformed {
                        line: index + 1,
                        content: raw.to_string(),
                    })
                }
            }
        }
        Ok(Self { entries })
    }

    pub fn to_text(&self) -> String {
        self.entries
            .iter()
            .map(|(source, target)| format!("{} {}\n", source, target))
            .collect()
    }

    pub fn get(&self, source_id: &str) -> Option<&str> {
        self.entries.get(source_id).map(String::as_str)
    }

    pub fn insert(&mut self, source_id: impl Into<String>, target_id: impl Into<String>) {
        self.entries.insert(source_id.into(), target_id.into());
    }

    pub fn remove_target(&mut self, target_id: &str) {
        self.entries.retain(|_, target| target != target_id);
    }

    /// Drops mappings whose source id is not in `source_ids`; returns how many went.
    pub fn retain_sources(&mut self, source_ids: &HashSet<&str>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|source, _| source_ids.contains(source.as_str()));
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub struct IdMapFile {
    path: PathBuf,
}

impl IdMapFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// A missing file is an empty table.
    pub fn load(&self) -> Result<IdMap, IdMapError> {
        if !self.path.exists() {
            return Ok(IdMap::default());
        }
        let content = std::fs::read_to_string(&self.path)?;
        IdMap::parse(&content)
    }

    pub fn save(&self, map: &IdMap) -> Result<(), IdMapError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, map.to_text())?;
        Ok(())
    }
}
