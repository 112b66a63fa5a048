//! Data models for ModelBoard live-resource subscriptions.
//!
//! This crate provides the core data structures shared by the subscription
//! client and the dedicated resource watchers:
//!
//! * [`ResourceType`] - The kinds of platform entities a subscription can
//!   concern (clusters, deployments, model versions, pods, ...)
//! * [`ResourceEvent`] - A single live-update event for one entity, carrying
//!   the entity's raw JSON payload
//! * [`ApiPod`] / [`ApiPodStatus`] / [`PodPhase`] - Typed representations of
//!   the Kubernetes pod payloads delivered by the pod watch endpoints
//!
//! Event payloads are kept as raw [`serde_json::Value`]s on the wire types so
//! consumers that only need the `uid` never pay for a full deserialization;
//! [`ResourceEvent::to`] converts into a typed model when one exists.

#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use strum_macros::{AsRefStr, EnumString};

/// The kind of platform entity a subscription or event concerns.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ResourceType {
    Organization,
    Cluster,
    Deployment,
    DeploymentRevision,
    ModelRepository,
    Model,
    ModelVersion,
    BentoRepository,
    Bento,
    Pod,
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.as_ref())
    }
}

/// A live-update event for a single entity.
///
/// The `payload` is the entity as the server sent it. Every entity carries a
/// `uid` field identifying it within its resource type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceEvent {
    /// The kind of entity this event concerns.
    pub resource_type: ResourceType,
    /// The raw entity payload.
    pub payload: Value,
}

impl ResourceEvent {
    /// Returns the entity's `uid`, if the payload carries one.
    #[must_use]
    pub fn uid(&self) -> Option<&str> {
        self.payload.get("uid").and_then(Value::as_str)
    }

    /// Deserializes the payload into a typed model.
    ///
    /// # Errors
    ///
    /// * If the payload does not match the target type's shape
    pub fn to<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}

/// Lifecycle phase of a Kubernetes pod.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, AsRefStr,
)]
#[serde(rename_all = "PascalCase")]
#[strum(serialize_all = "PascalCase")]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl std::fmt::Display for PodPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.as_ref())
    }
}

/// Runtime status of a pod as reported by the pod watch endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiPodStatus {
    /// Current lifecycle phase.
    pub phase: PodPhase,
    /// Whether the pod's readiness checks pass.
    #[serde(default)]
    pub ready: bool,
    /// RFC 3339 timestamp of when the pod started, if it has.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    /// Whether the pod belongs to a superseded deployment revision.
    #[serde(default)]
    pub is_old: bool,
    /// IP of the node hosting the pod.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_ip: Option<String>,
}

/// A Kubernetes pod as delivered by the live pod views.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiPod {
    /// Unique identifier of the pod.
    pub uid: String,
    /// Pod name.
    pub name: String,
    /// Kubernetes namespace the pod runs in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Runtime status.
    pub status: ApiPodStatus,
    /// Warning events attached to the pod.
    #[serde(default)]
    pub warnings: Vec<String>,
}
