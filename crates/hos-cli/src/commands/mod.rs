//! CLI subcommand implementations.

pub mod log;
pub mod recompute;
pub mod report;
pub mod trip;
pub mod util;
