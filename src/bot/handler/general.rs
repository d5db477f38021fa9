use teloxide::prelude::*;

use crate::bot::{parser::Invocation, HandlerResult};

use super::utils::{send_bot_message, HandlerContext};

/* Hello command.
 * Greets the sender by first name.
 */
pub async fn action_hello(ctx: HandlerContext, invocation: Invocation<Message>) -> HandlerResult {
    let msg = invocation.raw;
    send_bot_message(&ctx.bot, &msg, greeting(msg.from().map(|user| user.first_name.as_str())))
        .await
}

/* Echo command.
 * Replies with the arguments joined by single spaces. Says nothing when there are none.
 */
pub async fn action_echo(ctx: HandlerContext, invocation: Invocation<Message>) -> HandlerResult {
    if let Some(text) = echo_text(&invocation.args) {
        send_bot_message(&ctx.bot, &invocation.raw, text).await?;
    }
    Ok(())
}

/* Utilities */

fn greeting(first_name: Option<&str>) -> String {
    match first_name {
        Some(name) if !name.is_empty() => format!("Hello, {name}!"),
        _ => "Hello!".to_string(),
    }
}

fn echo_text(args: &[String]) -> Option<String> {
    if args.is_empty() {
        None
    } else {
        Some(args.join(" "))
    }
}
