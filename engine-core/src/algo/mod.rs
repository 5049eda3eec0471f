//! Execution algorithms (§4.11-§4.14): each owns its own child orders via
//! `parent_id` and is driven by market-data ticks and order-manager
//! callbacks.

pub mod chase;
pub mod scalper;
pub mod trail_stop;
pub mod twap;
