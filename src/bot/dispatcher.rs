use std::{num::ParseFloatError, sync::Arc};

use teloxide::{prelude::*, RequestError};
use tokio::task::JoinHandle;

use super::{
    api::ApiError,
    barrier::FaultBarrier,
    handler::{default_mapping, HandlerContext},
    parser::{parse, Inbound},
    registry::{Mapping, Registry},
    store::{run_blocking, KeyValueStore, StoreError},
};

/* Dispatcher is the central hub of the bot.
 * It receives raw messages from the transport, parses them, looks up the handler for the
 * command token, and hands the call to the fault barrier. Routing never waits on a handler.
 * Messages whose token has no handler are dropped silently, so chatter not meant for the
 * bot is simply ignored.
 */

/* Types */
pub type HandlerResult = Result<(), BotError>;

#[derive(thiserror::Error, Debug)]
pub enum BotError {
    #[error("User error: {0}")]
    UserError(String),
    #[error("Request error: {0}")]
    RequestError(RequestError),
    #[error("Store error: {0}")]
    StoreError(StoreError),
    #[error("API error: {0}")]
    ApiError(ApiError),
    #[error("Parse error: {0}")]
    ParseError(ParseFloatError),
}

impl From<RequestError> for BotError {
    fn from(request_error: RequestError) -> BotError {
        BotError::RequestError(request_error)
    }
}

impl From<StoreError> for BotError {
    fn from(store_error: StoreError) -> BotError {
        BotError::StoreError(store_error)
    }
}

impl From<ApiError> for BotError {
    fn from(api_error: ApiError) -> BotError {
        BotError::ApiError(api_error)
    }
}

impl From<ParseFloatError> for BotError {
    fn from(parse_error: ParseFloatError) -> BotError {
        BotError::ParseError(parse_error)
    }
}

pub struct CommandDispatcher<M> {
    registry: Registry<M>,
    barrier: FaultBarrier,
    store: Arc<dyn KeyValueStore>,
}

impl<M: Inbound> CommandDispatcher<M> {
    pub fn new(store: Arc<dyn KeyValueStore>, mapping: Mapping<M>) -> Self {
        CommandDispatcher {
            registry: Registry::new(mapping),
            barrier: FaultBarrier::new(),
            store,
        }
    }

    /* Routes one raw message.
     * Returns the handle of the scheduled handler, or None when nothing matched.
     * Must be called from within a tokio runtime.
     */
    pub fn route(&self, raw: M) -> Option<JoinHandle<()>> {
        let invocation = parse(raw);
        let handler = self.registry.lookup(&invocation.token)?;

        log::debug!(
            "Dispatcher - Routing {} with {} args",
            invocation.token,
            invocation.args.len()
        );

        // Even building the handler future happens inside the barrier
        Some(self.barrier.run(async move { handler(invocation).await }))
    }

    // Replaces the command mapping. Do this before steady-state routing begins.
    pub fn set_mapping(&self, mapping: Mapping<M>) {
        self.registry.set(mapping);
    }

    pub fn registry(&self) -> &Registry<M> {
        &self.registry
    }

    pub fn barrier(&self) -> &FaultBarrier {
        &self.barrier
    }

    pub fn store(&self) -> Arc<dyn KeyValueStore> {
        Arc::clone(&self.store)
    }

    // Waits for in-flight handlers, then releases the store.
    pub async fn shutdown(&self) -> Result<(), StoreError> {
        self.barrier.drain().await;
        log::info!("Dispatcher - All handlers finished, closing store");
        run_blocking(self.store(), |store| store.close()).await
    }
}

impl CommandDispatcher<Message> {
    // Dispatcher over the context's store. Without a custom mapping the built-in commands are used.
    pub fn from_context(ctx: &HandlerContext, mapping: Option<Mapping<Message>>) -> Self {
        let mapping = mapping.unwrap_or_else(|| default_mapping(ctx));
        CommandDispatcher::new(Arc::clone(&ctx.store), mapping)
    }
}

/* Main Dispatch function
 * Runs teloxide's long polling and routes every message update.
 * Returns once the bot is stopped with Ctrl-C.
 */
pub async fn run_dispatcher(bot: Bot, dispatcher: Arc<CommandDispatcher<Message>>) {
    let handler = Update::filter_message().endpoint(route_message);

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![dispatcher])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

async fn route_message(
    msg: Message,
    dispatcher: Arc<CommandDispatcher<Message>>,
) -> ResponseResult<()> {
    dispatcher.route(msg);
    Ok(())
}
