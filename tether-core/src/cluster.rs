//! Capability interfaces onto the cluster.
//!
//! The engine never talks to a real cluster directly; log streaming and
//! port-forwarding go through these traits so tests can substitute
//! deterministic doubles.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::AsyncRead;

use tether_model::{Forward, WatchName};

use crate::error::Result;

/// Runtime state of one container, as reported by pod introspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    /// Not yet started; nothing to stream.
    Waiting,
    Running,
    Terminated,
}

/// One container of a pod, as reported by pod introspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInfo {
    pub name: String,
    /// Runtime container id; empty until the container has been created.
    pub id: String,
    pub state: ContainerState,
}

/// A byte stream of container log output.
pub type LogStream = Box<dyn AsyncRead + Send + Unpin>;

/// Read access to pods and their log streams.
#[async_trait]
pub trait ClusterLogClient: Send + Sync {
    /// The containers of a pod, in declaration order (init containers
    /// first).
    async fn pod_containers(&self, pod: &str, namespace: &str) -> Result<Vec<ContainerInfo>>;

    /// Open a log stream for one container, starting at `since` when given.
    async fn container_logs(
        &self,
        pod: &str,
        container: &str,
        namespace: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<LogStream>;
}

/// A tunnel created by [`PortForwardClient::create_forwarder`].
#[async_trait]
pub trait ActiveForward: Send {
    /// Run the tunnel. Resolves when it ends, with `Err` when it failed.
    async fn forward_ports(&mut self) -> Result<()>;
}

/// Creates port-forward tunnels.
#[async_trait]
pub trait PortForwardClient: Send + Sync {
    async fn create_forwarder(
        &self,
        pod: &str,
        namespace: &str,
        forward: &Forward,
    ) -> Result<Box<dyn ActiveForward>>;
}

/// Destination for streamed container log bytes.
#[async_trait]
pub trait LogSink: Send + Sync {
    async fn append(&self, watch: &WatchName, container: &str, chunk: &[u8]) -> Result<()>;
}
