//! Position tracking and risk management (§4.6-§4.10).

pub mod engine;
pub mod liquidation;
pub mod liquidation_driver;
pub mod math;
pub mod position_book;
pub mod pre_trade;

pub use engine::{FillOutcome, LiquidationSignal, RiskEngine};
pub use liquidation::{evaluate_account, AdlTier};
pub use liquidation_driver::handle_tick as handle_liquidation_tick;
pub use position_book::{AccountMeta, AccountStatus, PositionBook, RiskRules, VirtualPosition};
pub use pre_trade::{validate, ValidationErrorKind, ValidationResult};
