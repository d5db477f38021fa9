// Exported structs and constants
pub use self::bucket::RedisStore;
pub use self::connect::REDIS_URL_DEFAULT;

// Submodules
mod bucket;
mod connect;
