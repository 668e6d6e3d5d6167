//! Analysis modules.
//!
//! The aggregator turns stored observations into windowed anomaly rates;
//! the alerter acts on rates that cross the threshold.

pub mod aggregator;
pub mod alerter;

pub use aggregator::*;
pub use alerter::{Alerter, AlerterReport};
