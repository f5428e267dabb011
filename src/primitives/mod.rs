mod tx;

pub use tx::TransactionExt;
