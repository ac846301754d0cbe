//! Time-series loading for per-route boarding, landing and loader counts.
//!
//! Each source is a CSV with a timestamp column followed by one column per
//! route id. [`SignalTables::merge_route`] left-joins landing and loader onto
//! boarding and zero-fills whatever does not line up.

mod frame;
mod source;
mod table;

pub use frame::{SignalFrame, SignalRow};
pub use source::{SignalSource, SignalTables};
pub use table::{SignalTable, parse_timestamp};
