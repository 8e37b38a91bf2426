use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use kube::Client;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::metrics::Metrics;
use crate::Result;

pub mod resourceset;

/// Diagnostics to be exposed by the web server
#[derive(Clone, Serialize)]
pub struct Diagnostics {
    pub last_event: DateTime<Utc>,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self {
            last_event: Utc::now(),
        }
    }
}

/// State shared between the controller and the web server
#[derive(Clone)]
pub struct State {
    /// Diagnostics populated by the reconciler
    pub diagnostics: Arc<RwLock<Diagnostics>>,
    /// Metrics registry
    pub registry: prometheus::Registry,
    /// If set, only ResourceSets in this namespace are watched
    namespace: Option<String>,
    /// Delay before a transient failure is retried
    requeue_interval: Duration,
}

/// State wrapper around the controller outputs for the web server
impl State {
    pub fn new(namespace: Option<String>, requeue_interval: Duration) -> Self {
        Self {
            diagnostics: Arc::new(RwLock::new(Diagnostics::default())),
            registry: prometheus::Registry::default(),
            namespace,
            requeue_interval,
        }
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Metrics getter
    pub fn metrics(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.registry.gather()
    }

    /// State getter
    pub async fn diagnostics(&self) -> Diagnostics {
        self.diagnostics.read().await.clone()
    }
}

/// Register metrics and run every controller until shutdown
pub async fn run(client: Client, state: State) -> Result<()> {
    let metrics = Metrics::default().register(&state.registry)?;
    resourceset::run(client, metrics, state).await
}
