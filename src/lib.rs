//! Hive - Kubernetes control plane for cluster fleet lifecycle management
//!
//! Hive manages the installation, deprovisioning, and ongoing configuration
//! synchronization of remote managed clusters. Each managed cluster is
//! declared as a [`crd::ClusterDeployment`] resource; the control plane
//! drives installation via batch jobs and continuously reconciles
//! user-authored sync sets against the managed cluster.
//!
//! # Architecture
//!
//! Two level-triggered controllers share the ClusterDeployment resource but
//! no in-process state:
//!
//! - The **cluster deployment controller** materializes installer and
//!   uninstaller jobs and tracks install completion, guarded by the
//!   deprovision finalizer.
//! - The **sync set controller** computes the sync bundles applicable to
//!   each installed cluster and applies their resources and patches to the
//!   managed cluster, tracking per-object status.
//!
//! # Modules
//!
//! - [`crd`] - Custom Resource Definitions (ClusterDeployment, SyncSet, SelectorSyncSet)
//! - [`controller`] - Kubernetes controller reconciliation logic
//! - [`install`] - Installer/uninstaller job generation
//! - [`apply`] - Applier and dynamic-delete contracts against managed clusters
//! - [`conditions`] - Sync condition bookkeeping with update policies
//! - [`finalizer`] - Finalizer add/remove/test helpers
//! - [`error`] - Error types for the operator

#![deny(missing_docs)]

pub mod apply;
pub mod conditions;
pub mod controller;
pub mod crd;
pub mod error;
pub mod finalizer;
pub mod install;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Finalizer blocking ClusterDeployment deletion until deprovision completes
pub const FINALIZER_DEPROVISION: &str = "hive.openshift.io/deprovision";

/// Finalizer blocking SyncSet/SelectorSyncSet deletion until synced resources
/// are cleaned up on the managed cluster
pub const FINALIZER_SYNCSET_CLEANUP: &str = "hive.openshift.io/syncset-cleanup";

/// Field manager name used for all writes issued by the operator
pub const FIELD_MANAGER: &str = "hive-operator";
