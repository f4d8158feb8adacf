use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
};

#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct BlockId(u64);

impl BlockId {
    pub fn from_raw(id: u64) -> BlockId {
        BlockId(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

/// Assigns block ids and unique block names.
///
/// A registry is owned by the flowgraph that created it (and shared with the
/// hierarchical blocks built for that flowgraph). Names are released when the
/// blocks are removed or the flowgraph is dropped.
#[derive(Debug, Default)]
pub struct BlockRegistry {
    inner: Mutex<RegistryInner>,
}

#[derive(Debug, Default)]
struct RegistryInner {
    next_id: u64,
    live: HashMap<BlockId, String>,
    next_suffix: HashMap<String, usize>,
}

impl BlockRegistry {
    pub fn new() -> BlockRegistry {
        BlockRegistry::default()
    }

    pub fn register(&self, base_name: &str) -> (BlockId, String) {
        let mut inner = self.lock();
        assert!(inner.next_id < u64::MAX);
        let id = BlockId(inner.next_id);
        inner.next_id += 1;
        let suffix = inner.next_suffix.entry(base_name.to_string()).or_insert(0);
        let name = format!("{base_name}_{suffix}");
        *suffix += 1;
        inner.live.insert(id, name.clone());
        (id, name)
    }

    pub fn unregister(&self, id: BlockId) -> Option<String> {
        self.lock().live.remove(&id)
    }

    pub fn name(&self, id: BlockId) -> Option<String> {
        self.lock().live.get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn unique_names() {
        let registry = BlockRegistry::new();
        let (a, a_name) = registry.register("copy");
        let (b, b_name) = registry.register("copy");
        let (c, c_name) = registry.register("head");
        assert_ne!(a, b);
        assert_ne!(b, c);
        assert_eq!(a_name, "copy_0");
        assert_eq!(b_name, "copy_1");
        assert_eq!(c_name, "head_0");
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.unregister(b).as_deref(), Some("copy_1"));
        assert_eq!(registry.name(b), None);
        // names are never reused, so that logs stay unambiguous
        let (_, d_name) = registry.register("copy");
        assert_eq!(d_name, "copy_2");
    }
}
