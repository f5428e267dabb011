use super::{batch::Operation, Batch, DBKey, DBValue, Database};
use crate::error::DBError;
use rocksdb::{ColumnFamily, DBIterator, Direction, IteratorMode, Options, WriteBatch, DB};
use std::marker::PhantomData;
use std::path::PathBuf;

/// RocksDB wrapper used by the persistent coin view. Columns are supplied
/// by the caller so the key layout stays next to the code that owns it.
pub struct DiskDatabase {
    db: DB,
    columns: Vec<&'static str>,
}

pub struct Iter<'a, V: DBValue> {
    iter: DBIterator<'a>,
    v: PhantomData<V>,
}

impl<'a, V: DBValue> Iterator for Iter<'a, V> {
    type Item = (Box<[u8]>, V);
    fn next(&mut self) -> Option<Self::Item> {
        let (key, value) = self.iter.next()?.ok()?;
        let value = V::decode(&value).ok()?;
        Some((key, value))
    }
}

pub enum IterMode<K: DBKey> {
    Start,
    End,
    From(K, IterDirection),
}

pub enum IterDirection {
    Forward,
    Reverse,
}

impl DiskDatabase {
    pub fn new(path: PathBuf, columns: Vec<&'static str>) -> Result<Self, DBError> {
        let mut db_options = Options::default();
        db_options.create_if_missing(true);
        db_options.create_missing_column_families(true);
        db_options.increase_parallelism(4);
        db_options.set_compression_type(rocksdb::DBCompressionType::Snappy);

        let db = Self {
            db: DB::open_cf(&db_options, path, &columns)?,
            columns,
        };

        db.compact()?;

        Ok(db)
    }

    fn compact(&self) -> Result<(), DBError> {
        for column in &self.columns {
            let col = self.col(column)?;
            self.db
                .compact_range_cf::<Vec<u8>, Vec<u8>>(col, None, None);
        }
        Ok(())
    }

    fn col(&self, col: &'static str) -> Result<&ColumnFamily, DBError> {
        self.db
            .cf_handle(col)
            .ok_or(DBError::Other("bad column"))
    }

    pub fn iter_cf<K: DBKey, V: DBValue>(
        &self,
        col: &'static str,
        mode: IterMode<K>,
    ) -> Result<Iter<V>, DBError> {
        let col = self.col(col)?;

        let iter = match mode {
            IterMode::Start => self.db.iterator_cf(col, IteratorMode::Start),
            IterMode::End => self.db.iterator_cf(col, IteratorMode::End),
            IterMode::From(key, direction) => {
                let from = key.encode();
                let direction = match direction {
                    IterDirection::Forward => Direction::Forward,
                    IterDirection::Reverse => Direction::Reverse,
                };
                self.db.iterator_cf(col, IteratorMode::From(&from, direction))
            }
        };

        Ok(Iter {
            iter,
            v: PhantomData,
        })
    }
}

impl Database for DiskDatabase {
    fn get<K: DBKey, V: DBValue>(&self, key: K) -> Result<Option<V>, DBError> {
        let col = self.col(key.col())?;
        let raw = self.db.get_pinned_cf(col, key.encode())?;
        Ok(match raw {
            Some(raw) => Some(V::decode(&raw)?),
            None => None,
        })
    }

    fn write_batch<K: DBKey>(&self, batch: Batch<K>) -> Result<(), DBError> {
        let mut write_batch = WriteBatch::default();
        for operation in batch.operations {
            match operation {
                Operation::Insert(key, value) => {
                    let col = self.col(key.col())?;
                    write_batch.put_cf(col, key.encode(), value);
                }
                Operation::Remove(key) => {
                    let col = self.col(key.col())?;
                    write_batch.delete_cf(col, key.encode());
                }
            }
        }
        self.db.write(write_batch)?;
        Ok(())
    }

    fn has<K: DBKey>(&self, key: K) -> Result<bool, DBError> {
        let col = self.col(key.col())?;
        let value = self.db.get_pinned_cf(col, key.encode())?;
        Ok(value.is_some())
    }
}
