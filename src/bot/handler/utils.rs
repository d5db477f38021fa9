use std::sync::Arc;

use teloxide::prelude::*;

use crate::bot::{config::RatesConfig, store::KeyValueStore, BotError, HandlerResult};

/* Common utilites for handlers. */

/// Everything the built-in handlers need, captured by each handler closure.
#[derive(Clone)]
pub struct HandlerContext {
    pub bot: Bot,
    pub store: Arc<dyn KeyValueStore>,
    pub rates: RatesConfig,
}

// Sends a message in the same chat, as a reply to the original message.
pub async fn send_bot_message(bot: &Bot, msg: &Message, text: String) -> HandlerResult {
    bot.send_message(msg.chat.id, text)
        .reply_to_message_id(msg.id)
        .await?;
    Ok(())
}

// Parse an amount. Reads a string, returns f64.
pub fn parse_amount(text: &str) -> Result<f64, BotError> {
    let amount = text.parse::<f64>()?;

    if !amount.is_finite() {
        Err(BotError::UserError("Amount must be a number.".to_string()))
    } else if amount < 0.0 {
        Err(BotError::UserError("Amount must be positive.".to_string()))
    } else {
        Ok(amount)
    }
}
