use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;

use kube::api::{Api, ListParams};
use kube::client::Client;
use kube::runtime::controller::{Action, Controller};
use kube::runtime::watcher::Config;
use kube::ResourceExt;
use tokio::sync::RwLock;
use tracing::*;

use crate::controllers::resourceset::reconcilers::{
    reconcile_resources, KubeEventRecorder, KubeObjectStore,
};
use crate::controllers::{Diagnostics, State};
use crate::metrics::Metrics;
use crate::resources::resourcesets::ResourceSet;
use crate::template::TemplateEngine;
use crate::{Error, Result};

pub(super) struct Context {
    /// Access to the objects a ResourceSet declares
    pub store: KubeObjectStore,
    /// Kubernetes event recorder
    pub recorder: KubeEventRecorder,
    /// Renders resource templates
    pub engine: TemplateEngine,
    /// Diagnostics read by the web server
    pub diagnostics: Arc<RwLock<Diagnostics>>,
    /// Prometheus metrics
    pub metrics: Metrics,
    /// How long to wait before retrying a transient failure
    pub requeue_interval: Duration,
}

impl Context {
    pub fn new(client: Client, metrics: Metrics, state: State) -> Arc<Context> {
        Arc::new(Context {
            store: KubeObjectStore::new(client.clone()),
            recorder: KubeEventRecorder::new(client),
            engine: TemplateEngine::new(),
            diagnostics: state.diagnostics.clone(),
            metrics,
            requeue_interval: state.requeue_interval,
        })
    }
}

#[instrument(skip(ctx, rs), fields(name = %rs.name_any()))]
async fn reconcile(rs: Arc<ResourceSet>, ctx: Arc<Context>) -> Result<Action> {
    let _timer = ctx.metrics.count_and_measure::<ResourceSet>();
    ctx.diagnostics.write().await.last_event = Utc::now();

    info!(
        "Reconciling ResourceSet {} in {}",
        rs.name_any(),
        rs.namespace().unwrap_or_default()
    );
    match reconcile_resources(&ctx.store, &ctx.recorder, &ctx.engine, &rs).await {
        Ok(reasons) => {
            for reason in reasons {
                ctx.metrics.applied_resource(reason);
            }
            Ok(Action::await_change())
        }
        Err(err) => {
            if let Error::ResourceApply { reason, .. } = &err {
                ctx.metrics.applied_resource(*reason);
            }
            ctx.metrics.reconcile_failure(rs.as_ref(), &err);
            Err(err)
        }
    }
}

fn error_policy(rs: Arc<ResourceSet>, err: &Error, ctx: Arc<Context>) -> Action {
    if err.requeue() {
        debug!(
            "Retrying ResourceSet {} in {:?}: {err}",
            rs.name_any(),
            ctx.requeue_interval
        );
        Action::requeue(ctx.requeue_interval)
    } else {
        Action::await_change()
    }
}

/// Run the ResourceSet controller
pub async fn run(client: Client, metrics: Metrics, state: State) -> Result<()> {
    let sets: Api<ResourceSet> = match state.namespace() {
        Some(namespace) => Api::namespaced(client.clone(), namespace),
        None => Api::all(client.clone()),
    };

    if let Err(e) = sets.list(&ListParams::default().limit(1)).await {
        error!("ResourceSet is not queryable; {e:?}. Is the CRD installed?");
        return Err(e.into());
    }

    Controller::new(sets, Config::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, Context::new(client, metrics, state))
        .filter_map(|x| async move { x.ok() })
        .for_each(|_| futures::future::ready(()))
        .await;

    Ok(())
}
