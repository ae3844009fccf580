//! CLI command handling

pub mod launch;
pub mod output;
pub mod panes;
pub mod search;
pub mod supervise;
pub mod tunnel;

pub use launch::*;
pub use output::*;
pub use panes::*;
pub use search::*;
pub use supervise::*;
pub use tunnel::*;
