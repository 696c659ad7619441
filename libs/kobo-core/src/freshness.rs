//! Freshness comparison between the remote database and the local replica.

use serde::Serialize;

/// Slack absorbing filesystem timestamp rounding, in seconds.
pub const MTIME_SLACK_SECS: f64 = 1.0;

/// What is known about the remote object's upload time.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RemoteStamp {
    /// Upload time in seconds since the epoch.
    Available { uploaded_at: f64 },
    /// The remote object does not exist.
    Missing,
    /// The metadata call failed (network, auth, timeout).
    Unavailable { reason: String },
}

impl RemoteStamp {
    /// Build from a millisecond upload timestamp.
    pub fn from_millis(millis: i64) -> Self {
        Self::Available {
            uploaded_at: millis as f64 / 1000.0,
        }
    }

    pub fn uploaded_at(&self) -> Option<f64> {
        match self {
            Self::Available { uploaded_at } => Some(*uploaded_at),
            _ => None,
        }
    }
}

/// Outcome of a freshness comparison.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Freshness {
    /// No local replica exists; a sync is required.
    NoReplica,
    /// The remote object is newer than the replica.
    Stale { local: f64, remote: f64 },
    /// The replica is at least as new as the remote object.
    Fresh { local: f64, remote: f64 },
    /// The remote object is absent; the replica is kept.
    RemoteMissing { local: f64 },
    /// Remote metadata could not be fetched; the replica is kept.
    RemoteUnavailable { local: f64, reason: String },
}

impl Freshness {
    /// Compare a local mtime (seconds, `0.0` when absent) with a remote stamp.
    pub fn compare(local_mtime: f64, remote: &RemoteStamp) -> Self {
        if local_mtime <= 0.0 {
            return Self::NoReplica;
        }

        match remote {
            RemoteStamp::Available { uploaded_at } if *uploaded_at > 0.0 => {
                if *uploaded_at > local_mtime + MTIME_SLACK_SECS {
                    Self::Stale {
                        local: local_mtime,
                        remote: *uploaded_at,
                    }
                } else {
                    Self::Fresh {
                        local: local_mtime,
                        remote: *uploaded_at,
                    }
                }
            }
            RemoteStamp::Available { .. } => Self::RemoteUnavailable {
                local: local_mtime,
                reason: "remote object has no upload timestamp".to_string(),
            },
            RemoteStamp::Missing => Self::RemoteMissing { local: local_mtime },
            RemoteStamp::Unavailable { reason } => Self::RemoteUnavailable {
                local: local_mtime,
                reason: reason.clone(),
            },
        }
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, Self::NoReplica | Self::Stale { .. })
    }
}

/// Staleness rule: no replica is stale; an unknown remote time is not;
/// otherwise stale iff `remote > local + 1s`.
pub fn is_stale(local_mtime: f64, remote: &RemoteStamp) -> bool {
    Freshness::compare(local_mtime, remote).is_stale()
}
