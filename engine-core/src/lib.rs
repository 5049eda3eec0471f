//! engine-core — a single-threaded, cooperatively-scheduled execution
//! engine sitting between a command surface and a crypto derivatives
//! exchange: order lifecycle, position/risk tracking, liquidation, and
//! four execution algorithms (chase, scalper, TWAP, trail-stop).
//!
//! ## Concurrency model
//! One event loop owns order/position/algorithm state directly — no
//! cross-thread mutation of engine state. I/O (REST calls, feed
//! subscriptions) runs on `tokio` tasks and reports back into the loop via
//! channels; `catalog` and `marketdata` use concurrent maps because they're
//! read from fan-out tasks outside the loop, everything else does not.
//!
//! ## Modules
//! - `catalog`: exchange symbol metadata, price/quantity rounding.
//! - `gateway`: rate-limited, retrying REST facade.
//! - `marketdata`: L1 cache and subscriber fan-out.
//! - `orders`: the order record, state machine, registry, and manager.
//! - `risk`: position book, pure risk math, pre-trade validation, ADL
//!   liquidation, and the risk engine that wires them to fills/ticks.
//! - `algo`: chase, scalper, TWAP, and trail-stop algorithms.
//! - `router`: external command queue consumer and dispatch table.
//! - `events` / `persistence`: the outbound event envelope and the
//!   durable-state schema.
//! - `config`, `monitoring`, `resilience`, `testing`, `utils`: ambient
//!   stack shared across the above.

pub mod algo;
pub mod catalog;
pub mod config;
pub mod errors;
pub mod events;
pub mod gateway;
pub mod marketdata;
pub mod monitoring;
pub mod orders;
pub mod persistence;
pub mod resilience;
pub mod risk;
pub mod router;
pub mod testing;
pub mod utils;

pub use anyhow::{Error, Result};

/// Prelude for binaries and integration tests.
pub mod prelude {
    pub use crate::algo::{chase, scalper, trail_stop, twap};
    pub use crate::catalog::{SymbolCatalog, SymbolSpec};
    pub use crate::errors::{StateTransitionRejected, TransportError, ValidationError};
    pub use crate::events::{build_event, Event, EventKind, SequenceCounter};
    pub use crate::gateway::{ExchangeGateway, PaperMatcher, PlaceOrderAck, PlaceOrderRequest, RestGateway};
    pub use crate::marketdata::{MarketDataFanout, OrderbookSnapshot, Quote};
    pub use crate::orders::{
        generate_client_order_id, now_ms, Fill, Order, OrderRegistry, OrderStatus, OrderType,
        Origin, PositionSide, Side,
    };
    pub use crate::orders::manager::OrderManager;
    pub use crate::persistence::{InMemoryPersistence, Persistence};
    pub use crate::risk::{handle_liquidation_tick, PositionBook, RiskEngine, RiskRules};
    pub use crate::router::{route, ChannelCommandSource, CommandDispatcher, CommandEnvelope, CommandReply, CommandSource, HandlerKind};
    pub use crate::{Error, Result};
}
