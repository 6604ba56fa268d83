pub mod marketplace;
pub mod match_;
pub mod nonce;
pub mod order;

pub use marketplace::*;
pub use match_::*;
pub use nonce::*;
pub use order::*;
