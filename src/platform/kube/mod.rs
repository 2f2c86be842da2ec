//! Kubernetes implementation of the platform traits.

mod exec;
mod jobs;
mod portforward;
mod resources;

use k8s_openapi::api::core::v1::Pod;
use kube::{Api, Client};
use tracing::debug;

use crate::error::Result;

use super::DEFAULT_DISCOVERY_CONCURRENCY;

pub use portforward::KubePortForwarder;

/// Kubernetes client bound to one namespace.
#[derive(Clone)]
pub struct KubeClient {
    /// Underlying API client.
    client: Client,
    /// Namespace of the component.
    namespace: String,
    /// API kinds listed concurrently during discovery.
    concurrency: usize,
}

impl std::fmt::Debug for KubeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeClient")
            .field("namespace", &self.namespace)
            .field("concurrency", &self.concurrency)
            .finish_non_exhaustive()
    }
}

impl KubeClient {
    /// Connects with the default kubeconfig or in-cluster configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if no configuration can be loaded.
    pub async fn try_default(namespace: Option<String>) -> Result<Self> {
        let client = Client::try_default().await?;
        let namespace = namespace.unwrap_or_else(|| client.default_namespace().to_string());
        debug!("Using namespace: {}", namespace);
        Ok(Self::new(client, namespace))
    }

    /// Wraps an existing client.
    #[must_use]
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            concurrency: DEFAULT_DISCOVERY_CONCURRENCY,
        }
    }

    /// Sets how many API kinds are listed at once.
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Namespaced API of `K`.
    fn api<K>(&self) -> Api<K>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        <K as kube::Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn pods(&self) -> Api<Pod> {
        self.api()
    }

    /// Underlying API client.
    #[must_use]
    pub fn client(&self) -> &Client {
        &self.client
    }
}
