//! Kubernetes controller reconciliation logic
//!
//! Two controllers share the ClusterDeployment resource but no in-process
//! state:
//!
//! - [`cluster_deployment`] drives install/uninstall jobs and the
//!   deprovision finalizer.
//! - [`syncset`] applies sync bundles to installed clusters and records
//!   per-object outcomes.

pub mod cluster_deployment;
pub mod syncset;
