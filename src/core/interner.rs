//! Interning table for path components shared by every loaded symbol graph.

use parking_lot::RwLock;
use rustc_hash::FxHashSet;
use std::sync::Arc;
use crate::core::keytypes::Path;

/// Deduplicates repeated path components across resource groups.
///
/// Owned by one manager; cleared by `reset()` before the distribution cache.
#[derive(Debug, Default)]
pub struct Interner {
    table: RwLock<FxHashSet<Arc<str>>>,
}

impl Interner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&self, s: &str) -> Arc<str> {
        if let Some(existing) = self.table.read().get(s) {
            return existing.clone();
        }

        let mut table = self.table.write();
        if let Some(existing) = table.get(s) {
            return existing.clone();
        }
        let value: Arc<str> = Arc::from(s);
        table.insert(value.clone());
        value
    }

    pub fn intern_path(&self, path: &Path) -> Path {
        Path::from_shared(path.parts().iter().map(|p| self.intern(p)).collect())
    }

    pub fn len(&self) -> usize {
        self.table.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.read().is_empty()
    }

    pub fn clear(&self) {
        self.table.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interned_strings_are_shared() {
        let interner = Interner::new();
        let a = interner.intern("json");
        let b = interner.intern("json");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(interner.len(), 1);
    }

    #[test]
    fn interned_path_keeps_identity() {
        let interner = Interner::new();
        let path = Path::new("json.decoder.JSONDecoder");
        let interned = interner.intern_path(&path);
        assert_eq!(interned, path);
        assert_eq!(interner.len(), 3);

        interner.clear();
        assert!(interner.is_empty());
    }
}
