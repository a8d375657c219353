use chrono::{DateTime, Utc};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Declarative configuration for streaming one pod's container logs.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PodLogStreamSpec {
    pub pod: String,
    pub namespace: String,
    /// Only stream logs emitted after this time. `None` streams from the
    /// beginning of the container's log.
    pub since_time: Option<DateTime<Utc>>,
    /// When non-empty, only these containers are streamed and
    /// `ignore_containers` is not consulted.
    pub only_containers: Vec<String>,
    pub ignore_containers: Vec<String>,
}

impl PodLogStreamSpec {
    /// Apply the spec's inclusion/exclusion lists to a set of container
    /// names. `only_containers` wins over `ignore_containers` when both are
    /// set.
    pub fn selects_container(&self, name: &str) -> bool {
        if !self.only_containers.is_empty() {
            return self.only_containers.iter().any(|c| c == name);
        }
        if !self.ignore_containers.is_empty() {
            return !self.ignore_containers.iter().any(|c| c == name);
        }
        true
    }
}

/// Per-container state within a log stream.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ContainerLogStreamStatus {
    pub name: String,
    /// True while a tail is actively copying bytes for this container.
    pub active: bool,
    /// Sticky: once a terminated container has been streamed to completion,
    /// it is never reopened.
    pub terminated: bool,
    /// Empty means healthy.
    pub error: String,
}

/// Status written back for a pod log stream.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PodLogStreamStatus {
    /// Stream-level error (pod missing, introspection failure). Empty means
    /// healthy.
    pub error: String,
    pub container_statuses: Vec<ContainerLogStreamStatus>,
}

impl PodLogStreamStatus {
    /// Reset the tracked containers if the selected set changed, preserving
    /// existing sub-statuses when the names still line up.
    pub fn ensure_containers(&mut self, names: &[String]) {
        let matching = self.container_statuses.len() == names.len()
            && self
                .container_statuses
                .iter()
                .zip(names)
                .all(|(cs, name)| &cs.name == name);
        if matching {
            return;
        }

        self.container_statuses = names
            .iter()
            .map(|name| ContainerLogStreamStatus {
                name: name.clone(),
                ..ContainerLogStreamStatus::default()
            })
            .collect();
        self.error.clear();
    }

    /// Mutate the status of one tracked container, if present.
    pub fn mutate_container(
        &mut self,
        name: &str,
        mutate: impl FnOnce(&mut ContainerLogStreamStatus),
    ) {
        if let Some(cs) = self
            .container_statuses
            .iter_mut()
            .find(|cs| cs.name == name)
        {
            mutate(cs);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(only: &[&str], ignore: &[&str]) -> PodLogStreamSpec {
        PodLogStreamSpec {
            pod: "app".into(),
            namespace: "default".into(),
            only_containers: only.iter().map(|s| s.to_string()).collect(),
            ignore_containers: ignore.iter().map(|s| s.to_string()).collect(),
            ..PodLogStreamSpec::default()
        }
    }

    #[test]
    fn only_list_takes_precedence() {
        let spec = spec(&["web"], &["web"]);
        assert!(spec.selects_container("web"));
        assert!(!spec.selects_container("sidecar"));
    }

    #[test]
    fn ignore_list_filters_when_only_is_empty() {
        let spec = spec(&[], &["istio-proxy"]);
        assert!(spec.selects_container("web"));
        assert!(!spec.selects_container("istio-proxy"));
    }

    #[test]
    fn ensure_containers_preserves_matching_state() {
        let mut status = PodLogStreamStatus::default();
        status.ensure_containers(&["web".into(), "sidecar".into()]);
        status.mutate_container("web", |cs| cs.active = true);

        status.ensure_containers(&["web".into(), "sidecar".into()]);
        assert!(status.container_statuses[0].active);

        status.ensure_containers(&["web".into()]);
        assert_eq!(status.container_statuses.len(), 1);
        assert!(!status.container_statuses[0].active);
    }
}
