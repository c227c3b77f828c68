mod error;
mod partitions;
pub mod pruning;
mod store;

pub use error::{LedgerError, Result};
pub use pruning::{run_sweep, RetentionPolicy, SweepStats};
pub use store::{FaxStore, InboundFilter, Transition};
