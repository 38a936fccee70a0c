//! SyncSet and SelectorSyncSet Custom Resource Definitions
//!
//! Both carry the same payload: a list of opaque resource blobs and a list
//! of patches to maintain on managed clusters. A SyncSet targets
//! ClusterDeployments by explicit reference within its namespace; a
//! SelectorSyncSet is cluster-scoped and targets by label selector.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{
    ClusterDeploymentReference, ResourceApplyMode, ResourceDeletionPolicy, SyncObjectPatch,
};

/// Specification for a SyncSet
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "hive.openshift.io",
    version = "v1alpha1",
    kind = "SyncSet",
    plural = "syncsets",
    shortname = "ss",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct SyncSetSpec {
    /// ClusterDeployments this bundle applies to, by name within the
    /// SyncSet's namespace
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cluster_deployment_refs: Vec<ClusterDeploymentReference>,

    /// Serialized objects to apply to the managed cluster, in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<serde_json::Value>,

    /// Patches to apply to existing objects on the managed cluster
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub patches: Vec<SyncObjectPatch>,

    /// Whether resources removed from the spec are deleted from the
    /// managed cluster
    #[serde(default)]
    pub resource_apply_mode: ResourceApplyMode,

    /// Whether synced resources are torn down when this bundle is deleted
    #[serde(default)]
    pub resource_deletion_policy: ResourceDeletionPolicy,
}

/// Specification for a SelectorSyncSet
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "hive.openshift.io",
    version = "v1alpha1",
    kind = "SelectorSyncSet",
    plural = "selectorsyncsets",
    shortname = "sss"
)]
#[serde(rename_all = "camelCase")]
pub struct SelectorSyncSetSpec {
    /// Label selector evaluated against ClusterDeployment labels
    #[serde(default)]
    pub cluster_deployment_selector: LabelSelector,

    /// Serialized objects to apply to the managed cluster, in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<serde_json::Value>,

    /// Patches to apply to existing objects on the managed cluster
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub patches: Vec<SyncObjectPatch>,

    /// Whether resources removed from the spec are deleted from the
    /// managed cluster
    #[serde(default)]
    pub resource_apply_mode: ResourceApplyMode,

    /// Whether synced resources are torn down when this bundle is deleted
    #[serde(default)]
    pub resource_deletion_policy: ResourceDeletionPolicy,
}
