//! Custom Resource Definitions for the Hive control plane
//!
//! - [`ClusterDeployment`] - a declared managed cluster (namespaced)
//! - [`SyncSet`] - a bundle of resources/patches targeting clusters by
//!   explicit reference (namespaced)
//! - [`SelectorSyncSet`] - the same payload targeting clusters by label
//!   selector (cluster-scoped)

mod cluster_deployment;
mod syncset;
pub mod types;

pub use cluster_deployment::{ClusterDeployment, ClusterDeploymentSpec, ClusterDeploymentStatus};
pub use syncset::{SelectorSyncSet, SelectorSyncSetSpec, SyncSet, SyncSetSpec};
pub use types::{
    AwsPlatformSecrets, ClusterDeploymentReference, ConditionStatus, PatchApplyMode,
    PlatformSecrets, ResourceApplyMode, ResourceDeletionPolicy, SecretReference, SyncCondition,
    SyncConditionType, SyncObjectPatch, SyncSetObjectStatus, SyncStatus,
};
