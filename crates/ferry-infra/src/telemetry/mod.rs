//! Tracing initialization
//!
//! JSON output for production log shipping, human readable output otherwise.

mod init_basic;

pub use init_basic::init_telemetry;
