//! Container lifecycle: spec, orchestration and the live handle.

mod handle;
mod orchestrator;
mod spec;

pub use handle::{ExecResult, StartedContainer, StoppedContainer};
pub use orchestrator::ContainerOrchestrator;
pub use spec::{ContainerSpec, ExposedPort, Protocol, PUBLISH_HOST_IP};

use tracing::info;

use crate::auth::RegistryAuth;
use crate::error::{ContainerError, RuntimeError};
use crate::runtime::{ContainerRuntime, CreateRequest};

/// Tag assumed when an image reference carries none.
pub const DEFAULT_TAG: &str = "latest";

/// Splits an image reference into repository and tag (or digest).
///
/// A colon only separates a tag when it follows the last `/`, so registry
/// ports (`localhost:5000/app`) are kept in the repository.
pub fn split_image(image: &str) -> (String, String) {
    if let Some((name, digest)) = image.split_once('@') {
        return (name.to_string(), digest.to_string());
    }
    let slash = image.rfind('/').map(|i| i + 1).unwrap_or(0);
    match image[slash..].rfind(':') {
        Some(colon) => {
            let split = slash + colon;
            (image[..split].to_string(), image[split + 1..].to_string())
        }
        None => (image.to_string(), DEFAULT_TAG.to_string()),
    }
}

/// Creates a container, pulling its image and retrying once if the runtime
/// reports the image missing.
///
/// Any other create failure is returned without retry. A second
/// image-not-found after the pull is a creation error as well.
pub(crate) async fn create_with_pull(
    runtime: &dyn ContainerRuntime,
    request: &CreateRequest,
    auth: Option<&RegistryAuth>,
) -> Result<String, ContainerError> {
    let creation = |source: RuntimeError| ContainerError::Creation {
        image: request.image.clone(),
        source,
    };

    match runtime.create_container(request).await {
        Ok(id) => return Ok(id),
        Err(RuntimeError::ImageNotFound(_)) => {}
        Err(source) => return Err(creation(source)),
    }

    let (name, tag) = split_image(&request.image);
    info!(image = %request.image, "Image not present locally, pulling");
    let credentials = match auth {
        Some(auth) => auth.credentials_for_image(&request.image).await?,
        None => None,
    };
    runtime
        .pull_image(&name, &tag, credentials.as_ref())
        .await
        .map_err(creation)?;

    runtime.create_container(request).await.map_err(creation)
}
