use teloxide::types::Message;

use super::registry::{handler, Mapping};

// Exported functions
pub use self::exchange::{action_exchange, action_retrieve, RATES_META_NAMESPACE, RATES_NAMESPACE};
pub use self::general::{action_echo, action_hello};

// Exported structs and types
pub use self::utils::HandlerContext;

// Submodules
mod exchange;
mod general;
mod utils;

pub const COMMAND_HELLO: &str = "/hello";
pub const COMMAND_ECHO: &str = "/echo";
pub const COMMAND_EXCHANGE: &str = "/xchg";
pub const COMMAND_RETRIEVE: &str = "/rxr";

// Namespaces the built-in handlers need before the first message is routed.
pub const REQUIRED_NAMESPACES: [&str; 2] = [RATES_NAMESPACE, RATES_META_NAMESPACE];

/* The built-in command mapping.
 * Every handler gets its own clone of the context per call.
 */
pub fn default_mapping(ctx: &HandlerContext) -> Mapping<Message> {
    let mut mapping = Mapping::new();

    let hello_ctx = ctx.clone();
    mapping.insert(
        COMMAND_HELLO.to_string(),
        handler(move |invocation| action_hello(hello_ctx.clone(), invocation)),
    );

    let echo_ctx = ctx.clone();
    mapping.insert(
        COMMAND_ECHO.to_string(),
        handler(move |invocation| action_echo(echo_ctx.clone(), invocation)),
    );

    let exchange_ctx = ctx.clone();
    mapping.insert(
        COMMAND_EXCHANGE.to_string(),
        handler(move |invocation| action_exchange(exchange_ctx.clone(), invocation)),
    );

    let retrieve_ctx = ctx.clone();
    mapping.insert(
        COMMAND_RETRIEVE.to_string(),
        handler(move |invocation| action_retrieve(retrieve_ctx.clone(), invocation)),
    );

    mapping
}
