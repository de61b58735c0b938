// skein/src/chain/mod.rs

//! The chain: compiled workflows, the driver loop, and sequential chain futures.

pub mod definition;
pub(crate) mod execution;
pub mod future;
pub mod handler;

pub use definition::{Chain, ChainBuilder};
pub use future::ChainFuture;
pub use handler::TaskHandler;
