#[cfg(feature = "storage-drive")]
use crate::DriveDestination;
#[cfg(feature = "storage-local")]
use crate::LocalDestination;
use crate::{Destination, DestinationResult};
#[cfg(not(all(feature = "storage-local", feature = "storage-drive")))]
use crate::DestinationError;
use ferry_core::{DestinationBackend, DestinationConfig};
use std::sync::Arc;

/// Create the destination backend described by the configuration
pub async fn create_destination(
    config: &DestinationConfig,
) -> DestinationResult<Arc<dyn Destination>> {
    let destination: Arc<dyn Destination> = match config.backend {
        #[cfg(feature = "storage-local")]
        DestinationBackend::Local => {
            let destination = LocalDestination::new(config.root.clone()).await?;
            tracing::info!(root = %config.root.display(), "Local destination root ready");
            Arc::new(destination)
        }

        #[cfg(not(feature = "storage-local"))]
        DestinationBackend::Local => {
            return Err(DestinationError::InvalidKey(
                "Local destination not available (storage-local feature not enabled)".to_string(),
            ))
        }

        #[cfg(feature = "storage-drive")]
        DestinationBackend::Drive => {
            let destination = DriveDestination::new(&config.drive)?;
            tracing::info!(
                shared_drive = ?config.drive.shared_drive_id,
                share_with = config.drive.share_with.len(),
                "Drive destination ready"
            );
            Arc::new(destination)
        }

        #[cfg(not(feature = "storage-drive"))]
        DestinationBackend::Drive => {
            return Err(DestinationError::InvalidKey(
                "Drive destination not available (storage-drive feature not enabled)".to_string(),
            ))
        }
    };

    tracing::info!(backend = destination.backend_name(), "Destination initialized");
    Ok(destination)
}
