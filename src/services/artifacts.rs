use crate::core::state::ScriptArtifact;
use std::collections::HashMap;

/// Generated scripts keyed by episode number. Each key is written once.
#[derive(Debug, Default, Clone)]
pub struct ArtifactStore {
    scripts: HashMap<u32, String>,
}

impl ArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `content` unless the episode already has a script.
    /// Returns whether anything was written.
    pub fn insert_if_absent(&mut self, episode_number: u32, content: String) -> bool {
        match self.scripts.entry(episode_number) {
            std::collections::hash_map::Entry::Vacant(e) => {
                e.insert(content);
                true
            }
            std::collections::hash_map::Entry::Occupied(_) => false,
        }
    }

    pub fn contains(&self, episode_number: u32) -> bool {
        self.scripts.contains_key(&episode_number)
    }

    pub fn get(&self, episode_number: u32) -> Option<ScriptArtifact> {
        self.scripts.get(&episode_number).map(|content| ScriptArtifact {
            episode_number,
            content: content.clone(),
        })
    }

    /// All artifacts, ordered by episode number.
    pub fn sorted(&self) -> Vec<ScriptArtifact> {
        let mut keys: Vec<u32> = self.scripts.keys().copied().collect();
        keys.sort_unstable();
        keys.into_iter().filter_map(|k| self.get(k)).collect()
    }

    pub fn len(&self) -> usize {
        self.scripts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty()
    }

    pub fn clear(&mut self) {
        self.scripts.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_insert_is_ignored() {
        let mut store = ArtifactStore::new();
        assert!(store.insert_if_absent(1, "first".to_string()));
        assert!(!store.insert_if_absent(1, "second".to_string()));

        assert_eq!(store.get(1).unwrap().content, "first");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_sorted_orders_by_episode() {
        let mut store = ArtifactStore::new();
        store.insert_if_absent(3, "c".to_string());
        store.insert_if_absent(1, "a".to_string());
        store.insert_if_absent(2, "b".to_string());

        let episodes: Vec<u32> = store.sorted().iter().map(|a| a.episode_number).collect();
        assert_eq!(episodes, vec![1, 2, 3]);
    }
}
