use std::borrow::Borrow;
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Stable name identifying one desired watch within its kind.
///
/// Used as the map key throughout the engine: the reconciler's active set,
/// the status publisher's dedup cache, and the object store are all keyed by
/// `WatchName`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct WatchName(String);

impl WatchName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WatchName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WatchName {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for WatchName {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl Borrow<str> for WatchName {
    fn borrow(&self) -> &str {
        &self.0
    }
}
