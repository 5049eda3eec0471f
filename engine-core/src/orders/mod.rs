//! Universal order record, state machine, and registry (§3, §4.4, §4.5).

pub mod manager;
pub mod open_orders;
pub mod registry;
pub mod state;
pub mod types;

pub use open_orders::{OpenOrderView, OpenOrdersMirror};
pub use registry::OrderRegistry;
pub use state::is_valid_transition;
pub use types::{generate_client_order_id, now_ms, Fill, Order, OrderStatus, OrderType, Origin, PositionSide, Side};
