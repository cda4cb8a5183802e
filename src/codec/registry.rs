//! The descriptor-UUID → codec cache.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use uuid::Uuid;

use super::{Codec, ScalarKind};

/// Shared codec cache, one per pool.
///
/// Seeded with the canonical scalar codecs under the server's well-known
/// UUIDs plus the nil-UUID null codec. Entries are only ever added (by
/// the descriptor builder); nothing is evicted, so a descriptor id keeps
/// decoding the same way for the life of the registry.
#[derive(Debug, Clone)]
pub struct CodecRegistry {
    inner: Arc<RwLock<HashMap<Uuid, Arc<Codec>>>>,
}

impl CodecRegistry {
    pub fn new() -> Self {
        let mut map = HashMap::with_capacity(ScalarKind::ALL.len() + 1);
        map.insert(Uuid::nil(), Arc::new(Codec::Null));
        for kind in ScalarKind::ALL {
            let id = kind.well_known_id();
            map.insert(id, Arc::new(Codec::Scalar { id, kind }));
        }
        Self {
            inner: Arc::new(RwLock::new(map)),
        }
    }

    pub fn get(&self, id: &Uuid) -> Option<Arc<Codec>> {
        self.inner.read().expect("codec registry poisoned").get(id).cloned()
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.inner.read().expect("codec registry poisoned").contains_key(id)
    }

    pub(crate) fn insert(&self, codec: Arc<Codec>) {
        self.inner
            .write()
            .expect("codec registry poisoned")
            .insert(codec.id(), codec);
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_with_well_known_scalars() {
        let reg = CodecRegistry::new();
        assert!(reg.contains(&Uuid::nil()));
        for kind in ScalarKind::ALL {
            let codec = reg.get(&kind.well_known_id()).unwrap();
            match &*codec {
                Codec::Scalar { kind: k, .. } => assert_eq!(*k, kind),
                other => panic!("expected scalar, got {other:?}"),
            }
        }
    }

    #[test]
    fn registries_are_isolated() {
        let a = CodecRegistry::new();
        let b = CodecRegistry::new();
        let id = Uuid::from_u128(0xFEED);
        a.insert(Arc::new(Codec::Enum {
            id,
            members: vec!["one".into()],
        }));
        assert!(a.contains(&id));
        assert!(!b.contains(&id));
    }
}
