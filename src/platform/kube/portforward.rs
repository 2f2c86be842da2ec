//! Local port forwarding to a pod through the API server.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::Api;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{ReconcileError, Result};
use crate::platform::PortForwarder;
use crate::state::ForwardedPort;

use super::KubeClient;

/// Forwards local ports to a pod, one listener per port.
pub struct KubePortForwarder {
    pods: Api<Pod>,
    /// Cancels the listeners of the current forwarding.
    current: Mutex<Option<CancellationToken>>,
}

impl std::fmt::Debug for KubePortForwarder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubePortForwarder").finish_non_exhaustive()
    }
}

impl KubePortForwarder {
    /// Creates a forwarder using `client`'s namespace.
    #[must_use]
    pub fn new(client: &KubeClient) -> Self {
        Self {
            pods: client.pods(),
            current: Mutex::new(None),
        }
    }
}

#[async_trait]
impl PortForwarder for KubePortForwarder {
    async fn start_port_forwarding(&self, pod: &str, ports: &[ForwardedPort]) -> Result<()> {
        self.stop_port_forwarding().await;

        let token = CancellationToken::new();
        for port in ports {
            let address = format!("{}:{}", port.local_address, port.local_port);
            let listener = TcpListener::bind(&address)
                .await
                .map_err(|e| ReconcileError::PortForward {
                    message: format!("unable to listen on {address}: {e}"),
                })?;
            debug!("Forwarding {} to {}:{}", address, pod, port.container_port);

            tokio::spawn(accept_loop(
                listener,
                self.pods.clone(),
                pod.to_string(),
                port.container_port,
                token.child_token(),
            ));
        }

        *self.current.lock().await = Some(token);
        Ok(())
    }

    async fn stop_port_forwarding(&self) {
        if let Some(token) = self.current.lock().await.take() {
            token.cancel();
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    pods: Api<Pod>,
    pod: String,
    port: u16,
    token: CancellationToken,
) {
    loop {
        let conn = tokio::select! {
            () = token.cancelled() => return,
            accepted = listener.accept() => accepted,
        };
        match conn {
            Ok((stream, _)) => {
                let pods = pods.clone();
                let pod = pod.clone();
                tokio::spawn(async move {
                    if let Err(e) = forward_connection(stream, &pods, &pod, port).await {
                        warn!("Port forwarding to {}:{} failed: {}", pod, port, e);
                    }
                });
            }
            Err(e) => warn!("Accepting connection for port {} failed: {}", port, e),
        }
    }
}

async fn forward_connection(
    mut stream: TcpStream,
    pods: &Api<Pod>,
    pod: &str,
    port: u16,
) -> std::result::Result<(), String> {
    let mut forwarder = pods.portforward(pod, &[port]).await.map_err(|e| e.to_string())?;
    let mut upstream = forwarder
        .take_stream(port)
        .ok_or_else(|| format!("no stream for port {port}"))?;
    tokio::io::copy_bidirectional(&mut stream, &mut upstream)
        .await
        .map_err(|e| e.to_string())?;
    drop(upstream);
    forwarder.join().await.map_err(|e| e.to_string())
}
