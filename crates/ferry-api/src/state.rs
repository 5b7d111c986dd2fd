use std::sync::Arc;
use std::time::Duration;

use ferry_worker::IntakeQueue;

/// Shared state of the intake router
#[derive(Clone)]
pub struct AppState {
    pub intake: IntakeQueue,
    pub secret: Arc<str>,
    pub signature_tolerance: Duration,
}

impl AppState {
    pub fn new(intake: IntakeQueue, secret: &str, signature_tolerance: Duration) -> Self {
        Self {
            intake,
            secret: Arc::from(secret),
            signature_tolerance,
        }
    }
}
