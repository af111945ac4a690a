//! Per-relay circuit key table
//!
//! Maps a circuit id to the symmetric key this relay shares with the proxy
//! for that circuit. Entries are written on key exchange and read on every
//! cell. Nothing ever removes an entry.

use crate::crypto::keys::SymmetricKey;
use crate::privacy::circuit::CircuitId;
use parking_lot::RwLock;
use std::collections::HashMap;

#[derive(Default)]
pub struct CircuitKeyRecord {
    keys: RwLock<HashMap<CircuitId, SymmetricKey>>,
}

impl CircuitKeyRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `key` to `circuit_id`. Returns `true` if an earlier key for the
    /// same id was overwritten.
    pub fn insert(&self, circuit_id: CircuitId, key: SymmetricKey) -> bool {
        self.keys.write().insert(circuit_id, key).is_some()
    }

    pub fn get(&self, circuit_id: CircuitId) -> Option<SymmetricKey> {
        self.keys.read().get(&circuit_id).cloned()
    }

    pub fn contains(&self, circuit_id: CircuitId) -> bool {
        self.keys.read().contains_key(&circuit_id)
    }

    pub fn len(&self) -> usize {
        self.keys.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.read().is_empty()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::key_exchange::generate_symmetric_key;
    use std::sync::Arc;

    #[test]
    fn test_insert_and_get() {
        let record = CircuitKeyRecord::new();
        let key = generate_symmetric_key();

        assert!(!record.insert(CircuitId::new(1), key.clone()));
        assert_eq!(record.get(CircuitId::new(1)), Some(key));
        assert!(record.get(CircuitId::new(2)).is_none());
    }

    #[test]
    fn test_rekey_overwrites() {
        let record = CircuitKeyRecord::new();
        let first = generate_symmetric_key();
        let second = generate_symmetric_key();

        record.insert(CircuitId::new(9), first);
        assert!(record.insert(CircuitId::new(9), second.clone()));
        assert_eq!(record.get(CircuitId::new(9)), Some(second));
        assert_eq!(record.len(), 1);
    }

    #[test]
    fn test_concurrent_inserts() {
        let record = Arc::new(CircuitKeyRecord::new());
        let handles: Vec<_> = (0..8u32)
            .map(|t| {
                let record = Arc::clone(&record);
                std::thread::spawn(move || {
                    for i in 0..100u32 {
                        record.insert(CircuitId::new(t * 1000 + i), generate_symmetric_key());
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(record.len(), 800);
        assert!(record.contains(CircuitId::new(7099)));
        assert!(!record.is_empty());
    }
}
