mod memory_remote_store;
mod redis_remote_store;

pub use memory_remote_store::{glob_match, InMemoryRemoteStore};
pub use redis_remote_store::{parse_info, RedisRemoteStore};
