mod connection_factory;
mod remote_store;

pub use connection_factory::{ConnectionFactory, PoolError};
pub use remote_store::{CacheError, RemoteInfo, RemoteStore};
