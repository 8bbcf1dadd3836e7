//! Progress reporting for running transfers.

pub mod poller;
pub mod progress;
