//! Conversation store implementations for Lantern.

pub mod file_backend;
pub mod in_memory;

use std::sync::Arc;

use lantern_config::StoreConfig;
use lantern_core::error::StoreError;
use lantern_core::store::ConversationStore;

pub use file_backend::FileStore;
pub use in_memory::InMemoryStore;

/// Open the store selected by `config.backend`.
pub fn open_store(config: &StoreConfig) -> Result<Arc<dyn ConversationStore>, StoreError> {
    match config.backend.as_str() {
        "memory" => Ok(Arc::new(InMemoryStore::new())),
        "file" => Ok(Arc::new(FileStore::open(config.path())?)),
        other => Err(StoreError::Storage(format!("Unknown store backend '{other}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_configured_backend() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig {
            backend: "file".into(),
            path: Some(dir.path().join("chats.json").display().to_string()),
        };
        assert_eq!(open_store(&config).unwrap().name(), "file");

        let memory = StoreConfig {
            backend: "memory".into(),
            path: None,
        };
        assert_eq!(open_store(&memory).unwrap().name(), "memory");
    }
}
