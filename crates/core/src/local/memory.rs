use std::collections::HashMap;

use clientkey_common::CommonError;
use parking_lot::Mutex;

use crate::ports::LocalStore;

/// In-process [`LocalStore`]
#[derive(Debug, Default)]
pub struct MemoryLocalStore {
    items: Mutex<HashMap<String, String>>,
}

impl MemoryLocalStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

impl LocalStore for MemoryLocalStore {
    fn get_item(&self, key: &str) -> Result<Option<String>, CommonError> {
        Ok(self.items.lock().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), CommonError> {
        self.items.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), CommonError> {
        self.items.lock().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_remove() {
        let store = MemoryLocalStore::new();
        assert_eq!(store.get_item("k").unwrap(), None);

        store.set_item("k", "v1").unwrap();
        store.set_item("k", "v2").unwrap();
        assert_eq!(store.get_item("k").unwrap().as_deref(), Some("v2"));
        assert_eq!(store.len(), 1);

        store.remove_item("k").unwrap();
        assert!(store.is_empty());
    }
}
