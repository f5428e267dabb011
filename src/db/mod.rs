mod batch;
mod disk;
mod key;
mod value;

use crate::error::DBError;
pub use batch::{Batch, Operation};
pub use disk::{DiskDatabase, Iter, IterDirection, IterMode};
pub use key::DBKey;
pub use value::DBValue;

pub trait Database {
    fn get<K: DBKey, V: DBValue>(&self, key: K) -> Result<Option<V>, DBError>;
    fn write_batch<K: DBKey>(&self, batch: Batch<K>) -> Result<(), DBError>;
    fn has<K: DBKey>(&self, key: K) -> Result<bool, DBError>;
}
