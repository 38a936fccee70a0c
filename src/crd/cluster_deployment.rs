//! ClusterDeployment Custom Resource Definition
//!
//! A ClusterDeployment is the declarative record of an intended managed
//! cluster. The cluster deployment controller installs it via a batch job;
//! the sync set controller keeps it configured once installed.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{PlatformSecrets, SecretReference, SyncSetObjectStatus};

/// Specification for a ClusterDeployment
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "hive.openshift.io",
    version = "v1alpha1",
    kind = "ClusterDeployment",
    plural = "clusterdeployments",
    shortname = "cd",
    status = "ClusterDeploymentStatus",
    namespaced,
    printcolumn = r#"{"name":"Installed","type":"boolean","jsonPath":".status.installed"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterDeploymentSpec {
    /// Name of the cluster being installed
    pub cluster_name: String,

    /// Opaque install configuration document, serialized to YAML and handed
    /// to the installer job as `installconfig.yaml`
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub config: serde_json::Value,

    /// Platform credential secrets consumed by installer/uninstaller jobs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform_secrets: Option<PlatformSecrets>,
}

/// Status for a ClusterDeployment
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterDeploymentStatus {
    /// True once the install job has reported Complete
    #[serde(default)]
    pub installed: bool,

    /// Secret carrying the managed cluster's admin kubeconfig under key
    /// `kubeconfig`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_kubeconfig_secret: Option<SecretReference>,

    /// Per-bundle sync outcomes for SyncSets referencing this cluster
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sync_set_status: Vec<SyncSetObjectStatus>,

    /// Per-bundle sync outcomes for SelectorSyncSets matching this cluster
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub selector_sync_set_status: Vec<SyncSetObjectStatus>,
}
