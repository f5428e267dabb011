pub mod codec;
mod coins;
mod set;
mod stake;
mod undo;

pub use coins::{CoinStake, Coins, UnspentCoins};
pub use set::UnspentOutputSet;
pub use stake::{is_coinstake, BlockStake};
pub use undo::RewindData;
