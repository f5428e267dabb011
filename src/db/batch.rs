use super::{DBKey, DBValue};
use bitcoin::consensus::encode;

/// An ordered set of writes applied atomically by the backend.
pub struct Batch<K: DBKey> {
    pub operations: Vec<Operation<K>>,
}

pub enum Operation<K: DBKey> {
    Insert(K, Vec<u8>),
    Remove(K),
}

impl<K: DBKey> Batch<K> {
    pub fn new() -> Self {
        Self { operations: vec![] }
    }

    pub fn insert<V: DBValue>(&mut self, key: K, value: &V) -> Result<(), encode::Error> {
        self.operations.push(Operation::Insert(key, value.encode()?));
        Ok(())
    }

    pub fn remove(&mut self, key: K) {
        self.operations.push(Operation::Remove(key));
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

impl<K: DBKey> Default for Batch<K> {
    fn default() -> Self {
        Self::new()
    }
}
