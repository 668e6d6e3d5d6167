//! Report output: evidence packages, the alert log and the final summary.

pub mod generator;
pub mod package;

pub use generator::*;
pub use package::{AlertLog, PackageWriter};
