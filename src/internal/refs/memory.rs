//! In-memory [`RefBackend`](super::RefBackend).

use async_trait::async_trait;
use dashmap::DashMap;

use crate::errors::GitError;

use super::RefBackend;

#[derive(Default)]
pub struct MemoryRefBackend {
    refs: DashMap<String, String>,
}

impl MemoryRefBackend {
    pub fn new() -> Self {
        MemoryRefBackend { refs: DashMap::new() }
    }
}

#[async_trait]
impl RefBackend for MemoryRefBackend {
    async fn read(&self, name: &str) -> Result<Option<String>, GitError> {
        Ok(self.refs.get(name).map(|v| v.value().clone()))
    }

    async fn compare_and_swap(
        &self,
        name: &str,
        expected: Option<&str>,
        new: &str,
    ) -> Result<bool, GitError> {
        use dashmap::mapref::entry::Entry;
        match self.refs.entry(name.to_string()) {
            Entry::Occupied(mut occupied) => {
                if expected == Some(occupied.get().as_str()) {
                    occupied.insert(new.to_string());
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(vacant) => {
                if expected.is_none() {
                    vacant.insert(new.to_string());
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
        }
    }

    async fn delete(&self, name: &str) -> Result<(), GitError> {
        self.refs.remove(name);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, GitError> {
        Ok(self
            .refs
            .iter()
            .map(|entry| entry.key().clone())
            .filter(|name| name.starts_with(prefix))
            .collect())
    }
}
