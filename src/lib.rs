//! Matching and execution core of an on-chain marketplace relayer:
//! orderbook index, matching engine, execution engine, and the
//! nonce/broadcast subsystem. The HTTP control surface, structured
//! logger setup, credentials loading, and marketplace SDKs are external
//! collaborators consumed by, not part of, this crate.

pub mod broadcast;
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod execution;
pub mod ingest;
pub mod matching;
pub mod models;
pub mod nonce;
pub mod storage;
