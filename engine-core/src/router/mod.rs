//! Command router (§4.15): external queue consumer with a static
//! queue-name -> handler dispatch and a reply-by-`requestId` contract.
//! Grounded on original_source `commands/handler.py` (queue table, side
//! normalization).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::orders::Side;

pub mod channel_source;
pub mod dispatch;

pub use channel_source::ChannelCommandSource;
pub use dispatch::CommandDispatcher;

/// The fixed set of inbound queue names (§6).
pub const COMMAND_QUEUES: &[&str] = &[
    "cmd:trade",
    "cmd:limit",
    "cmd:scale",
    "cmd:close",
    "cmd:close_all",
    "cmd:cancel",
    "cmd:cancel_all",
    "cmd:basket",
    "cmd:chase",
    "cmd:chase_cancel",
    "cmd:scalper",
    "cmd:scalper_cancel",
    "cmd:twap",
    "cmd:twap_cancel",
    "cmd:twap_basket",
    "cmd:trail_stop",
    "cmd:trail_stop_cancel",
    "cmd:validate",
];

#[derive(Debug, Clone, Deserialize)]
pub struct CommandEnvelope {
    pub request_id: String,
    pub sub_account_id: String,
    pub payload: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommandReply {
    pub success: bool,
    #[serde(flatten)]
    pub data: Value,
}

impl CommandReply {
    pub fn ok(data: Value) -> Self {
        Self { success: true, data }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self { success: false, data: serde_json::json!({ "error": message.into() }) }
    }
}

/// Normalize a caller-supplied side token: `long -> buy`, `short -> sell`,
/// `buy`/`sell` pass through (case-insensitive).
pub fn normalize_side(raw: &str) -> Option<Side> {
    match raw.to_ascii_uppercase().as_str() {
        "LONG" | "BUY" => Some(Side::Buy),
        "SHORT" | "SELL" => Some(Side::Sell),
        _ => None,
    }
}

/// Normalize a caller-supplied symbol to the exchange-native joined form.
/// Thin wrapper so the router doesn't reach into `catalog` directly for a
/// one-line string transform.
pub fn normalize_symbol(raw: &str) -> String {
    crate::catalog::SymbolCatalog::normalize(raw)
}

/// Which logical handler a queue name routes to. A router holds one
/// instance of each and dispatches by matching on this enum rather than a
/// dynamic string->closure map, so an unknown queue is a compile-visible
/// gap instead of a silent miss.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    Trade,
    Limit,
    Scale,
    Close,
    CloseAll,
    Cancel,
    CancelAll,
    Basket,
    Chase,
    ChaseCancel,
    Scalper,
    ScalperCancel,
    Twap,
    TwapCancel,
    TwapBasket,
    TrailStop,
    TrailStopCancel,
    Validate,
}

pub fn route(queue: &str) -> Option<HandlerKind> {
    use HandlerKind::*;
    Some(match queue {
        "cmd:trade" => Trade,
        "cmd:limit" => Limit,
        "cmd:scale" => Scale,
        "cmd:close" => Close,
        "cmd:close_all" => CloseAll,
        "cmd:cancel" => Cancel,
        "cmd:cancel_all" => CancelAll,
        "cmd:basket" => Basket,
        "cmd:chase" => Chase,
        "cmd:chase_cancel" => ChaseCancel,
        "cmd:scalper" => Scalper,
        "cmd:scalper_cancel" => ScalperCancel,
        "cmd:twap" => Twap,
        "cmd:twap_cancel" => TwapCancel,
        "cmd:twap_basket" => TwapBasket,
        "cmd:trail_stop" => TrailStop,
        "cmd:trail_stop_cancel" => TrailStopCancel,
        "cmd:validate" => Validate,
        _ => return None,
    })
}

/// Consumes commands from a blocking-pop queue source and dispatches them.
/// The queue source itself is a seam (`CommandSource`) so tests can feed a
/// fixed script and production can back it with whatever broker the
/// deployment uses.
#[async_trait::async_trait]
pub trait CommandSource: Send + Sync {
    /// Blocking pop from any of `COMMAND_QUEUES`; returns the queue name and
    /// the envelope. `None` signals a clean shutdown request.
    async fn next_command(&self) -> Option<(String, CommandEnvelope)>;
    /// Write the reply to `result_of(requestId)` with a 30s TTL.
    async fn reply(&self, request_id: &str, reply: CommandReply);
}

/// Drains `source` until it yields `None` (a stop signal), dispatching each
/// command via `handle`. A handler panic is not caught here — callers
/// should ensure `handle` itself converts errors to `CommandReply::error`,
/// matching the "exceptions are caught and reported" contract from §4.15.
pub async fn run<S, F, Fut>(source: &S, mut handle: F)
where
    S: CommandSource,
    F: FnMut(HandlerKind, CommandEnvelope) -> Fut,
    Fut: std::future::Future<Output = CommandReply>,
{
    while let Some((queue, envelope)) = source.next_command().await {
        let reply = match route(&queue) {
            Some(kind) => handle(kind, envelope.clone()).await,
            None => CommandReply::error(format!("unknown queue: {queue}")),
        };
        source.reply(&envelope.request_id, reply).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn side_normalization_maps_long_short_and_passes_through() {
        assert_eq!(normalize_side("long"), Some(Side::Buy));
        assert_eq!(normalize_side("SHORT"), Some(Side::Sell));
        assert_eq!(normalize_side("buy"), Some(Side::Buy));
        assert_eq!(normalize_side("sell"), Some(Side::Sell));
        assert_eq!(normalize_side("bogus"), None);
    }

    #[test]
    fn symbol_normalization_delegates_to_catalog() {
        assert_eq!(normalize_symbol("BTC/USDT:USDT"), "BTCUSDT");
    }

    #[test]
    fn every_declared_queue_routes_to_a_handler() {
        for queue in COMMAND_QUEUES {
            assert!(route(queue).is_some(), "{queue} should route");
        }
    }

    #[test]
    fn unknown_queue_does_not_route() {
        assert!(route("cmd:nonsense").is_none());
    }
}
