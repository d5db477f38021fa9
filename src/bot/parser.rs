use teloxide::types::Message;

/* Parser turns a raw inbound message into a command invocation.
 * The text is split on single spaces. The first piece is the command token, used verbatim,
 * and the rest are the arguments in their original order.
 * Nothing is trimmed, folded or collapsed: "a  b" yields an empty argument in between.
 */

/// A raw message delivered by the transport. Only its text matters for routing.
pub trait Inbound: Send + 'static {
    fn text(&self) -> Option<&str>;
}

impl Inbound for Message {
    fn text(&self) -> Option<&str> {
        Message::text(self)
    }
}

impl Inbound for String {
    fn text(&self) -> Option<&str> {
        Some(self.as_str())
    }
}

/// One parsed command, handed to exactly one handler.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation<M> {
    pub token: String,
    pub args: Vec<String>,
    pub raw: M,
}

// Parses a raw message. Never fails, empty text gives an empty token.
pub fn parse<M: Inbound>(raw: M) -> Invocation<M> {
    let text = raw.text().unwrap_or_default();

    if text.trim().is_empty() {
        return Invocation {
            token: String::new(),
            args: Vec::new(),
            raw,
        };
    }

    let mut pieces = text.split(' ').map(str::to_string);
    let token = pieces.next().unwrap_or_default();
    let args = pieces.collect();

    Invocation { token, args, raw }
}
