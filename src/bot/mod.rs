// bot/mod.rs

// Exported functions
pub use self::dispatcher::run_dispatcher;
pub use self::handler::default_mapping;
pub use self::parser::parse;
pub use self::store::{ensure_namespaces, run_blocking};

// Exported structs and types
pub use self::api::ApiError;
pub use self::barrier::{Fault, FaultBarrier};
pub use self::config::{Config, ConfigError, RatesConfig};
pub use self::dispatcher::{BotError, CommandDispatcher, HandlerResult};
pub use self::handler::{HandlerContext, REQUIRED_NAMESPACES};
pub use self::parser::{Inbound, Invocation};
pub use self::redis::RedisStore;
pub use self::registry::{handler, HandlerFn, HandlerFuture, Mapping, Registry};
pub use self::store::{KeyValueStore, MemoryStore, StoreError};

// Declare submodules
mod api;
mod barrier;
mod config;
mod dispatcher;
mod handler;
mod parser;
mod redis;
mod registry;
mod store;
