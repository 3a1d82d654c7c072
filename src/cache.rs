//! Authorization snapshot, refresh orchestration, and status reporting.

pub mod manager;
pub mod snapshot;
pub mod status;
