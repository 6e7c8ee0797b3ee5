//! Error types shared across the rebalancer

use chrono::NaiveTime;
use thiserror::Error;

/// A Kubernetes quantity string could not be parsed
#[derive(Debug, Clone, PartialEq, Error)]
pub enum QuantityError {
    #[error("empty quantity")]
    Empty,
    #[error("invalid quantity '{0}'")]
    Invalid(String),
    #[error("negative quantity '{0}'")]
    Negative(String),
}

/// Schedule window configuration defects
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PolicyError {
    #[error("no schedule windows configured")]
    NoWindows,
    #[error("no schedule window covers {0}")]
    NoActiveWindow(NaiveTime),
    #[error("schedule windows leave {0} uncovered")]
    WindowGap(NaiveTime),
    #[error("schedule windows '{first}' and '{second}' overlap at {at}")]
    WindowOverlap {
        first: String,
        second: String,
        at: NaiveTime,
    },
    #[error("window '{name}' has min_replicas {min} greater than max_replicas {max}")]
    InvalidBounds { name: String, min: u32, max: u32 },
    #[error("invalid time '{0}', expected HH:MM")]
    InvalidTime(String),
}

/// Failures talking to the cluster or its backends
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("kubernetes api error: {0}")]
    Api(#[from] kube::Error),
    #[error("missing permission: {verb} on {resource}")]
    PermissionDenied { resource: String, verb: String },
    #[error("node '{0}' not found")]
    NodeNotFound(String),
    #[error("invalid resource quantity on {object}: {source}")]
    Quantity {
        object: String,
        #[source]
        source: QuantityError,
    },
    #[error("{0}")]
    Backend(String),
}
