//! Test helpers and fixture builders shared across the crate's test
//! modules.

pub mod helpers;

pub use helpers::*;
