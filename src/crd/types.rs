//! Supporting types shared by the Hive CRDs

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Reference to a secret by name, resolved in the referencing object's namespace
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct SecretReference {
    /// Name of the referenced secret
    pub name: String,
}

impl SecretReference {
    /// Create a reference to the named secret
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Reference to a ClusterDeployment by name within the same namespace
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct ClusterDeploymentReference {
    /// Name of the referenced ClusterDeployment
    pub name: String,
}

/// Platform credential secrets for a ClusterDeployment
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PlatformSecrets {
    /// AWS credential secret reference
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws: Option<AwsPlatformSecrets>,
}

/// AWS credential secret for installer/uninstaller jobs
///
/// The referenced secret must carry keys `awsAccessKeyId` and
/// `awsSecretAccessKey`.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct AwsPlatformSecrets {
    /// Secret holding the AWS access key pair
    pub credentials: SecretReference,
}

/// How resources removed from a sync bundle's spec are handled
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ResourceApplyMode {
    /// Create and update resources; never delete (default)
    #[default]
    Upsert,
    /// Create, update, and delete resources that leave the desired set
    Sync,
}

/// What happens to synced resources when their bundle is deleted
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ResourceDeletionPolicy {
    /// Delete synced resources from the managed cluster (default)
    #[default]
    Delete,
    /// Leave synced resources in place on the managed cluster
    Orphan,
}

/// How often a patch is applied to its target object
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum PatchApplyMode {
    /// Reapply periodically and on drift (default)
    #[default]
    AlwaysApply,
    /// Apply a single time; never reapply unless the patch body changes
    ApplyOnce,
}

/// A patch to apply to an object on the managed cluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SyncObjectPatch {
    /// API version of the target object
    pub api_version: String,

    /// Kind of the target object
    pub kind: String,

    /// Name of the target object
    pub name: String,

    /// Namespace of the target object
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// The patch body to send
    pub patch: String,

    /// Patch strategy: `json`, `merge`, or `strategic`
    ///
    /// Stored as a free-form string; legacy content-type spellings are
    /// migrated in place by the sync controller.
    #[serde(default)]
    pub patch_type: String,

    /// Whether the patch is applied once or periodically
    #[serde(default)]
    pub apply_mode: PatchApplyMode,
}

/// Typed condition on a synced object
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum SyncConditionType {
    /// The last apply of the object succeeded
    ApplySuccess,
    /// The last apply of the object failed
    ApplyFailure,
    /// Deleting the object from the managed cluster failed
    DeletionFailed,
    /// A resource blob in the bundle could not be introspected
    UnknownObject,
}

/// Status of a condition: True, False, or Unknown
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// The condition holds
    True,
    /// The condition does not hold
    False,
    /// The condition state cannot be determined
    #[default]
    Unknown,
}

/// Condition with probe and transition timestamps
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncCondition {
    /// Type of condition
    #[serde(rename = "type")]
    pub type_: SyncConditionType,

    /// Status of the condition
    pub status: ConditionStatus,

    /// Machine-readable reason for the condition
    #[serde(default)]
    pub reason: String,

    /// Human-readable message
    #[serde(default)]
    pub message: String,

    /// Last time the condition was probed
    pub last_probe_time: DateTime<Utc>,

    /// Last time the condition status changed
    pub last_transition_time: DateTime<Utc>,
}

/// Per-object record of what was last applied to the managed cluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    /// API version of the applied object
    pub api_version: String,

    /// Kind of the applied object
    pub kind: String,

    /// Plural resource name, used for dynamic-client deletion
    #[serde(default)]
    pub resource: String,

    /// Name of the applied object
    pub name: String,

    /// Namespace of the applied object
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Hex MD5 of the exact bytes last applied or attempted
    #[serde(default)]
    pub hash: String,

    /// Conditions recording apply/deletion outcomes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<SyncCondition>,
}

impl SyncStatus {
    /// Whether two records describe the same applied object
    ///
    /// Resources match on the full `(apiVersion, kind, namespace, name)`
    /// tuple; the plural `resource` is informational only.
    pub fn same_resource(&self, other: &SyncStatus) -> bool {
        self.name == other.name
            && self.namespace == other.namespace
            && self.api_version == other.api_version
            && self.kind == other.kind
    }

    /// Whether two records describe the same patched object
    ///
    /// Patches match on `(name, namespace, kind)` only; `apiVersion` is
    /// carried but excluded from the match.
    pub fn same_patch_target(&self, other: &SyncStatus) -> bool {
        self.name == other.name && self.namespace == other.namespace && self.kind == other.kind
    }
}

/// Per-(cluster, bundle) record of sync outcomes
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncSetObjectStatus {
    /// Name of the sync bundle this record belongs to
    pub name: String,

    /// Outcome of each resource in the bundle
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<SyncStatus>,

    /// Outcome of each patch in the bundle
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub patches: Vec<SyncStatus>,

    /// Bundle-level conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<SyncCondition>,
}
