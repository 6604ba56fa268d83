pub mod keys;
pub mod redis_client;

pub use keys::OrderbookKeys;
pub use redis_client::{RedisClient, RedisConfig};
