#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// One local-to-container port mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Forward {
    pub local_port: u16,
    pub container_port: u16,
    /// Local address to bind; `None` uses the forwarder's default
    /// (localhost).
    pub host: Option<String>,
}

/// Declarative configuration for a set of port-forwards to one pod.
///
/// The forward list is ordered; reordering it counts as a spec change.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PortForwardSpec {
    pub pod: String,
    pub namespace: String,
    pub forwards: Vec<Forward>,
}
