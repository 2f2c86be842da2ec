//! Devstate store trait definition.

use async_trait::async_trait;

use super::types::{ForwardedPort, Platform};
use crate::error::Result;

/// Persistence of the state of one dev session.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Records the session start on `platform`.
    ///
    /// Fails if another live session already runs on the same platform.
    async fn init(&self, platform: Platform) -> Result<()>;

    /// Records the ports forwarded by this session.
    async fn set_forwarded_ports(&self, ports: Vec<ForwardedPort>) -> Result<()>;

    /// Ports forwarded by every live session.
    async fn get_forwarded_ports(&self) -> Result<Vec<ForwardedPort>>;

    /// Ports forwarded by other live sessions in the same directory.
    async fn get_other_forwarded_ports(&self) -> Result<Vec<ForwardedPort>>;

    /// Records the port of the local API server.
    async fn set_api_server_port(&self, port: u16) -> Result<()>;

    /// Port of this session's API server, if any.
    async fn get_api_server_port(&self) -> Result<Option<u16>>;

    /// Whether a live session already serves its API on `port`.
    async fn is_api_server_running(&self, port: u16) -> Result<bool>;

    /// Removes the state of this session.
    async fn save_exit(&self) -> Result<()>;
}

#[async_trait]
impl StateStore for Box<dyn StateStore> {
    async fn init(&self, platform: Platform) -> Result<()> {
        (**self).init(platform).await
    }

    async fn set_forwarded_ports(&self, ports: Vec<ForwardedPort>) -> Result<()> {
        (**self).set_forwarded_ports(ports).await
    }

    async fn get_forwarded_ports(&self) -> Result<Vec<ForwardedPort>> {
        (**self).get_forwarded_ports().await
    }

    async fn get_other_forwarded_ports(&self) -> Result<Vec<ForwardedPort>> {
        (**self).get_other_forwarded_ports().await
    }

    async fn set_api_server_port(&self, port: u16) -> Result<()> {
        (**self).set_api_server_port(port).await
    }

    async fn get_api_server_port(&self) -> Result<Option<u16>> {
        (**self).get_api_server_port().await
    }

    async fn is_api_server_running(&self, port: u16) -> Result<bool> {
        (**self).is_api_server_running(port).await
    }

    async fn save_exit(&self) -> Result<()> {
        (**self).save_exit().await
    }
}
