use std::fmt;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};

use crate::resources::resourcesets::ResourceSet;
use crate::Error;

pub mod apply;
pub mod compare;
pub mod store;

pub use apply::{apply_resource, reconcile_resources, ApplyError};
pub use store::{EventRecorder, KubeEventRecorder, KubeObjectStore, ObjectStore};

/// Outcome of applying one resource, used as the event reason.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Reason {
    Created,
    CreateFailed,
    Updated,
    UpdateFailed,
    Unchanged,
    Failed,
    InvalidResource,
    ResourceExists,
}

impl Reason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Reason::Created => "Created",
            Reason::CreateFailed => "CreateFailed",
            Reason::Updated => "Updated",
            Reason::UpdateFailed => "UpdateFailed",
            Reason::Unchanged => "Unchanged",
            Reason::Failed => "Failed",
            Reason::InvalidResource => "InvalidResource",
            Reason::ResourceExists => "ResourceExists",
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The result of applying one resource declaration.
#[derive(Debug)]
pub struct ApplyResult {
    pub reason: Reason,
    pub message: String,
    pub error: Option<ApplyError>,
    pub requeue: bool,
}

impl ApplyResult {
    fn success(reason: Reason, message: String) -> Self {
        Self {
            reason,
            message,
            error: None,
            requeue: false,
        }
    }

    pub fn event_type(&self) -> EventType {
        if self.error.is_some() {
            EventType::Warning
        } else {
            EventType::Normal
        }
    }
}

impl From<ApplyError> for ApplyResult {
    fn from(err: ApplyError) -> Self {
        Self {
            reason: err.reason(),
            message: err.to_string(),
            requeue: err.requeue(),
            error: Some(err),
        }
    }
}

/// Where applied objects go and who owns them.
#[derive(Clone, Debug)]
pub struct ApplyTarget {
    pub name: String,
    pub namespace: String,
    pub owner: OwnerReference,
}

impl ApplyTarget {
    pub fn for_resource_set(rs: &ResourceSet) -> Result<Self, Error> {
        let namespace = rs
            .namespace()
            .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
        let owner = rs
            .controller_owner_ref(&())
            .ok_or(Error::MissingObjectKey(".metadata.uid"))?;

        Ok(Self {
            name: rs.name_any(),
            namespace,
            owner,
        })
    }
}
