//! Ferry API
//!
//! HTTP surface of the realtime path: a signed notification endpoint feeding the
//! [`ferry_worker::IntakeQueue`], plus a health check.

pub mod error;
pub mod handlers;
pub mod notification;
pub mod server;
pub mod state;

pub use error::IntakeError;
pub use notification::{parse_payload, ObjectNotification, Payload};
pub use server::{router, serve, shutdown_signal};
pub use state::AppState;
