use std::{process, sync::Arc};

use dispatchbot::bot::{
    ensure_namespaces, run_dispatcher, CommandDispatcher, Config, HandlerContext, KeyValueStore,
    RedisStore, REQUIRED_NAMESPACES,
};

#[tokio::main]
pub async fn main() {
    dotenv::dotenv().ok();
    pretty_env_logger::init();
    log::info!("Starting dispatch bot...");

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            log::error!("Startup - Invalid configuration: {}", err);
            process::exit(1);
        }
    };

    let store: Arc<dyn KeyValueStore> = match RedisStore::open(&config.store_url) {
        Ok(store) => Arc::new(store),
        Err(err) => {
            log::error!("Startup - Failed to open store at {}: {}", config.store_url, err);
            process::exit(1);
        }
    };

    // Handlers assume their namespaces exist, so there is no running without them
    if let Err(err) = ensure_namespaces(store.as_ref(), &REQUIRED_NAMESPACES) {
        log::error!("Startup - Failed to create namespaces: {}", err);
        process::exit(1);
    }

    let bot = teloxide::Bot::from_env();
    let ctx = HandlerContext {
        bot: bot.clone(),
        store,
        rates: config.rates.clone(),
    };
    let dispatcher = Arc::new(CommandDispatcher::from_context(&ctx, None));

    log::info!("Dispatch bot started successfully!");

    run_dispatcher(bot, Arc::clone(&dispatcher)).await;

    if let Err(err) = dispatcher.shutdown().await {
        log::error!("Shutdown - Failed to close store: {}", err);
    }
    log::info!("Dispatch bot stopped.");
}
