use std::sync::{Arc, RwLock};

use crate::knowledge::base::KnowledgeBase;

/// Process-wide holder of the current knowledge snapshot.
///
/// Readers clone the `Arc` and keep using their snapshot even if a reload swaps in a
/// new one mid-request. Snapshots are never mutated in place.
#[derive(Debug)]
pub struct KnowledgeStore {
    current: RwLock<Arc<KnowledgeBase>>,
}

impl KnowledgeStore {
    pub fn new(base: KnowledgeBase) -> Self {
        Self { current: RwLock::new(Arc::new(base)) }
    }

    pub fn snapshot(&self) -> Arc<KnowledgeBase> {
        match self.current.read() {
            Ok(current) => Arc::clone(&current),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Installs `base` and returns the snapshot it replaced.
    pub fn replace(&self, base: KnowledgeBase) -> Arc<KnowledgeBase> {
        let next = Arc::new(base);
        match self.current.write() {
            Ok(mut current) => std::mem::replace(&mut *current, next),
            Err(poisoned) => std::mem::replace(&mut *poisoned.into_inner(), next),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::knowledge::base::{KnowledgeBase, KnowledgeOrigin};
    use crate::knowledge::document::RagDocument;

    use super::KnowledgeStore;

    #[test]
    fn replace_swaps_snapshot_without_touching_held_readers() {
        let store = KnowledgeStore::new(KnowledgeBase::builtin());
        let held = store.snapshot();

        let previous = store.replace(KnowledgeBase::new(
            vec![RagDocument::new("doc-x", "Kubota SVL75 compatible con horquillas")],
            KnowledgeOrigin::Builtin,
        ));

        assert_eq!(held.len(), 2);
        assert_eq!(previous.fingerprint(), held.fingerprint());
        assert_eq!(store.snapshot().len(), 1);
        assert_ne!(store.snapshot().fingerprint(), held.fingerprint());
    }
}
