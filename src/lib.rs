use thiserror::Error;

use controllers::resourceset::reconcilers::{ApplyError, Reason};

#[derive(Error, Debug)]
pub enum Error {
    #[error("Kube Error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Metrics Error: {0}")]
    MetricsError(#[from] prometheus::Error),

    #[error("ResourceSet has no {0}")]
    MissingObjectKey(&'static str),

    #[error("Failed to apply resource #{index}: {source}")]
    ResourceApply {
        index: usize,
        reason: Reason,
        requeue: bool,
        source: ApplyError,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn metric_label(&self) -> &'static str {
        match self {
            Error::KubeError(_) => "KubeError",
            Error::MetricsError(_) => "MetricsError",
            Error::MissingObjectKey(_) => "MissingObjectKey",
            Error::ResourceApply { .. } => "ResourceApply",
        }
    }

    /// Whether reconciling again later may succeed without the ResourceSet changing.
    pub fn requeue(&self) -> bool {
        match self {
            Error::KubeError(_) => true,
            Error::MetricsError(_) | Error::MissingObjectKey(_) => false,
            Error::ResourceApply { requeue, .. } => *requeue,
        }
    }
}

pub mod controllers;
pub use controllers::{Diagnostics, State};

/// Composable transformations over manifest trees
pub mod reducer;

/// Template rendering for resource declarations
pub mod template;

/// Log and trace integrations
pub mod telemetry;

/// Metrics
mod metrics;

pub use metrics::Metrics;

/// Custom resources
pub mod resources;
