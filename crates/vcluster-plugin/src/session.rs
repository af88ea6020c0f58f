//! Plugin handshake with the vcluster container
//!
//! The host may start after the plugin, so registration is a "wait until the
//! host is ready" loop: every attempt dials a fresh connection, registers the
//! plugin by name, and on any failure waits one interval and tries again. Only
//! an empty plugin name or cancellation of the lifetime token ends the loop
//! without a result.

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::host::{ConnectionMaterial, HostConnector, HostError};
use crate::poll::{poll_until, PollConfig};
use crate::{Error, Result};

/// Register with the host and return the connection material it issues.
///
/// Blocks until the host answers or `token` is cancelled.
pub async fn init_session(
    name: &str,
    connector: &dyn HostConnector,
    config: &PollConfig,
    token: &CancellationToken,
) -> Result<ConnectionMaterial> {
    if name.is_empty() {
        return Err(Error::invalid_argument("please provide a plugin name"));
    }

    info!(plugin = %name, "Try creating context...");
    let material = poll_until(config, "plugin handshake", token, || async move {
        let session = connector.connect().await?;
        let material = session.register(name).await?;
        Ok::<_, HostError>(Some(material))
    })
    .await?;

    info!(
        plugin = %name,
        target_namespace = %material.target_namespace,
        current_namespace = %material.current_namespace,
        "Registered with vcluster"
    );
    Ok(material)
}
