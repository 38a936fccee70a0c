//! SyncSet controller implementation
//!
//! For every installed ClusterDeployment, computes the set of applicable
//! sync bundles (SyncSets by explicit reference, SelectorSyncSets by label
//! selector) and applies each bundle's resources and patches to the managed
//! cluster, recording per-object outcomes into the ClusterDeployment status.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::api::{Api, ListParams, Patch, PatchParams, PostParams};
use kube::runtime::controller::Action;
use kube::runtime::reflector::ObjectRef;
use kube::{Client, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

#[cfg(test)]
use mockall::automock;

use crate::apply::{Applier, DeleteOutcome, DynamicDelete, RemoteClusterBuilder};
use crate::conditions::{find_sync_condition, set_sync_condition, UpdateConditionCheck};
use crate::crd::{
    ClusterDeployment, ConditionStatus, PatchApplyMode, ResourceApplyMode, ResourceDeletionPolicy,
    SelectorSyncSet, SyncCondition, SyncConditionType, SyncObjectPatch, SyncSet,
    SyncSetObjectStatus, SyncStatus,
};
use crate::finalizer::{add_finalizer, has_finalizer, remove_finalizer};
use crate::{Error, Result, FIELD_MANAGER, FINALIZER_SYNCSET_CLEANUP};

/// Data key in the admin kubeconfig secret
const ADMIN_KUBECONFIG_KEY: &str = "kubeconfig";

const UNKNOWN_OBJECT_FOUND_REASON: &str = "UnknownObjectFound";
const UNKNOWN_OBJECT_NOT_FOUND_REASON: &str = "UnknownObjectNotFound";
const APPLY_SUCCEEDED_REASON: &str = "ApplySucceeded";
const APPLY_FAILED_REASON: &str = "ApplyFailed";
const DELETION_FAILED_REASON: &str = "DeletionFailed";

/// How long a successfully applied object may go untouched before it is
/// reapplied to correct drift
const REAPPLY_INTERVAL_HOURS: i64 = 2;

/// Trait abstracting Kubernetes client operations for the SyncSet controller
///
/// This trait allows mocking the Kubernetes client in tests while using
/// the real client in production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeClient: Send + Sync {
    /// List all SyncSets in a namespace
    async fn list_syncsets(&self, namespace: &str) -> Result<Vec<SyncSet>>;

    /// List all SelectorSyncSets (cluster-scoped)
    async fn list_selector_syncsets(&self) -> Result<Vec<SelectorSyncSet>>;

    /// Get a Secret, returning None when it does not exist
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>>;

    /// Replace a SyncSet (patch-type migration and finalizer changes)
    async fn update_syncset(&self, syncset: &SyncSet) -> Result<()>;

    /// Replace a SelectorSyncSet (patch-type migration and finalizer changes)
    async fn update_selector_syncset(&self, syncset: &SelectorSyncSet) -> Result<()>;

    /// Write a ClusterDeployment's status through the status subresource
    async fn update_status(&self, cd: &ClusterDeployment) -> Result<()>;
}

/// Real Kubernetes client implementation
pub struct KubeClientImpl {
    client: Client,
}

impl KubeClientImpl {
    /// Create a new KubeClientImpl wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl KubeClient for KubeClientImpl {
    async fn list_syncsets(&self, namespace: &str) -> Result<Vec<SyncSet>> {
        let api: Api<SyncSet> = Api::namespaced(self.client.clone(), namespace);
        let list = api.list(&ListParams::default()).await?;
        Ok(list.items)
    }

    async fn list_selector_syncsets(&self) -> Result<Vec<SelectorSyncSet>> {
        let api: Api<SelectorSyncSet> = Api::all(self.client.clone());
        let list = api.list(&ListParams::default()).await?;
        Ok(list.items)
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name).await.map_err(Error::Kube)
    }

    async fn update_syncset(&self, syncset: &SyncSet) -> Result<()> {
        let namespace = syncset.namespace().unwrap_or_default();
        let api: Api<SyncSet> = Api::namespaced(self.client.clone(), &namespace);
        api.replace(&syncset.name_any(), &PostParams::default(), syncset)
            .await?;
        Ok(())
    }

    async fn update_selector_syncset(&self, syncset: &SelectorSyncSet) -> Result<()> {
        let api: Api<SelectorSyncSet> = Api::all(self.client.clone());
        api.replace(&syncset.name_any(), &PostParams::default(), syncset)
            .await?;
        Ok(())
    }

    async fn update_status(&self, cd: &ClusterDeployment) -> Result<()> {
        let namespace = cd.namespace().unwrap_or_default();
        let api: Api<ClusterDeployment> = Api::namespaced(self.client.clone(), &namespace);
        let status_patch = serde_json::json!({
            "status": cd.status
        });
        api.patch_status(
            &cd.name_any(),
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&status_patch),
        )
        .await?;
        Ok(())
    }
}

/// Controller context shared across reconciliation calls
pub struct Context {
    /// Kubernetes client for API operations (trait object for testability)
    pub kube: Arc<dyn KubeClient>,
    /// Builder for per-cluster applier/delete clients
    pub remote: Arc<dyn RemoteClusterBuilder>,
}

impl Context {
    /// Create a new controller context with the given Kubernetes client
    pub fn new(client: Client) -> Self {
        Self {
            kube: Arc::new(KubeClientImpl::new(client)),
            remote: Arc::new(crate::apply::KubeRemoteClusterBuilder),
        }
    }

    /// Create a new controller context with custom client implementations
    ///
    /// This is primarily used for testing with mock clients.
    pub fn with_clients(kube: Arc<dyn KubeClient>, remote: Arc<dyn RemoteClusterBuilder>) -> Self {
        Self { kube, remote }
    }
}

/// Hex MD5 fingerprint of the exact bytes applied
fn resource_hash(data: &[u8]) -> String {
    format!("{:x}", md5::compute(data))
}

/// Reconcile the sync bundles applicable to a ClusterDeployment
///
/// Applies every resource and patch of every applicable bundle to the
/// managed cluster. The first per-bundle error is captured and returned
/// after all bundles are processed, so progress is maximized while retry is
/// still scheduled.
#[instrument(skip(cd, ctx), fields(cluster_deployment = %cd.name_any(), namespace = %cd.namespace().unwrap_or_default()))]
pub async fn reconcile(cd: Arc<ClusterDeployment>, ctx: Arc<Context>) -> Result<Action> {
    if cd.metadata.deletion_timestamp.is_some() {
        return Ok(Action::await_change());
    }
    if !cd.status.as_ref().map(|s| s.installed).unwrap_or(false) {
        debug!("cluster installation is not complete");
        return Ok(Action::await_change());
    }

    let namespace = cd.namespace().unwrap_or_default();
    let orig_status = cd.status.clone();
    let mut cd = (*cd).clone();

    info!("reconciling sync sets for cluster deployment");

    let mut syncsets = related_syncsets(&ctx, &cd, &namespace).await?;
    let mut selector_syncsets = related_selector_syncsets(&ctx, &cd).await?;

    if let Err(err) = migrate_syncset_patch_types(&ctx, &mut syncsets).await {
        error!(error = %err, "failed to migrate existing syncsets");
    }
    if let Err(err) = migrate_selector_syncset_patch_types(&ctx, &mut selector_syncsets).await {
        error!(error = %err, "failed to migrate existing selector syncsets");
    }

    let secret_name = cd
        .status
        .as_ref()
        .and_then(|s| s.admin_kubeconfig_secret.as_ref())
        .map(|s| s.name.clone())
        .unwrap_or_default();
    let kubeconfig = load_secret_data(&ctx, &namespace, &secret_name, ADMIN_KUBECONFIG_KEY).await?;

    let applier = ctx.remote.applier(&kubeconfig).await?;
    let deleter = ctx.remote.deleter(&kubeconfig).await?;

    let mut status = cd.status.take().unwrap_or_default();

    // Track the first error hit during reconcile. This lets us keep
    // processing bundles even if one encounters an error, while still
    // returning an error to the controller so it will retry.
    let mut first_err: Option<Error> = None;

    for syncset in &syncsets {
        let name = syncset.name_any();

        if syncset.metadata.deletion_timestamp.is_some()
            && has_finalizer(syncset, FINALIZER_SYNCSET_CLEANUP)
        {
            if syncset.spec.resource_deletion_policy != ResourceDeletionPolicy::Orphan {
                let entry = find_sync_set_object_status(&name, &status.sync_set_status);
                delete_bundle_resources(&entry, deleter.as_ref()).await;
            }
            remove_sync_set_object_status(&mut status.sync_set_status, &name);
            let mut syncset = syncset.clone();
            remove_finalizer(&mut syncset, FINALIZER_SYNCSET_CLEANUP);
            ctx.kube.update_syncset(&syncset).await?;
            continue;
        }

        if !has_finalizer(syncset, FINALIZER_SYNCSET_CLEANUP) {
            debug!(sync_set = %name, "adding syncset finalizer");
            let mut syncset = syncset.clone();
            add_finalizer(&mut syncset, FINALIZER_SYNCSET_CLEANUP);
            ctx.kube.update_syncset(&syncset).await?;
            continue;
        }

        debug!(sync_set = %name, "applying sync set");
        let mut entry = find_sync_set_object_status(&name, &status.sync_set_status);
        let result = apply_bundle(
            applier.as_ref(),
            deleter.as_ref(),
            syncset.spec.resource_apply_mode,
            &syncset.spec.resources,
            &syncset.spec.patches,
            &mut entry,
        )
        .await;
        append_or_update_sync_set_object_status(&mut status.sync_set_status, entry);
        if let Err(err) = result {
            error!(sync_set = %name, error = %err, "unable to apply sync set");
            if first_err.is_none() {
                first_err = Some(err);
            }
        }
    }

    for syncset in &selector_syncsets {
        let name = syncset.name_any();

        if syncset.metadata.deletion_timestamp.is_some()
            && has_finalizer(syncset, FINALIZER_SYNCSET_CLEANUP)
        {
            if syncset.spec.resource_deletion_policy != ResourceDeletionPolicy::Orphan {
                let entry = find_sync_set_object_status(&name, &status.selector_sync_set_status);
                delete_bundle_resources(&entry, deleter.as_ref()).await;
            }
            remove_sync_set_object_status(&mut status.selector_sync_set_status, &name);
            let mut syncset = syncset.clone();
            remove_finalizer(&mut syncset, FINALIZER_SYNCSET_CLEANUP);
            ctx.kube.update_selector_syncset(&syncset).await?;
            continue;
        }

        if !has_finalizer(syncset, FINALIZER_SYNCSET_CLEANUP) {
            debug!(selector_sync_set = %name, "adding syncset finalizer");
            let mut syncset = syncset.clone();
            add_finalizer(&mut syncset, FINALIZER_SYNCSET_CLEANUP);
            ctx.kube.update_selector_syncset(&syncset).await?;
            continue;
        }

        debug!(selector_sync_set = %name, "applying selector sync set");
        let mut entry = find_sync_set_object_status(&name, &status.selector_sync_set_status);
        let result = apply_bundle(
            applier.as_ref(),
            deleter.as_ref(),
            syncset.spec.resource_apply_mode,
            &syncset.spec.resources,
            &syncset.spec.patches,
            &mut entry,
        )
        .await;
        append_or_update_sync_set_object_status(&mut status.selector_sync_set_status, entry);
        if let Err(err) = result {
            error!(selector_sync_set = %name, error = %err, "unable to apply selector sync set");
            if first_err.is_none() {
                first_err = Some(err);
            }
        }
    }

    cd.status = Some(status);
    if cd.status != orig_status {
        info!("status has changed, updating cluster deployment");
        ctx.kube.update_status(&cd).await?;
    }

    debug!("done reconciling sync sets for cluster deployment");
    match first_err {
        Some(err) => Err(err),
        None => Ok(Action::await_change()),
    }
}

/// Error policy for the controller
pub fn error_policy(cd: Arc<ClusterDeployment>, error: &Error, _ctx: Arc<Context>) -> Action {
    error!(
        ?error,
        cluster_deployment = %cd.name_any(),
        "sync set reconciliation failed"
    );
    Action::requeue(Duration::from_secs(5))
}

/// Apply one bundle's resources and patches, recording outcomes into its
/// status entry
///
/// A resource error skips the bundle's patches; the entry reflects whatever
/// was attempted either way.
async fn apply_bundle(
    applier: &dyn Applier,
    deleter: &dyn DynamicDelete,
    apply_mode: ResourceApplyMode,
    resources: &[serde_json::Value],
    patches: &[SyncObjectPatch],
    entry: &mut SyncSetObjectStatus,
) -> Result<()> {
    apply_bundle_resources(applier, deleter, apply_mode, resources, entry).await?;
    apply_bundle_patches(applier, patches, entry).await
}

/// Decide whether an object needs another apply
///
/// Reapply when the object was never applied, its bytes changed, the last
/// apply failed, or (for periodically reapplied objects) the last success is
/// older than the reapply interval.
fn should_reapply(prior: Option<&SyncStatus>, hash: &str, periodic: bool) -> bool {
    let Some(prior) = prior else {
        return true;
    };
    if prior.hash != hash {
        return true;
    }
    if let Some(failure) = find_sync_condition(&prior.conditions, SyncConditionType::ApplyFailure) {
        if failure.status == ConditionStatus::True {
            return true;
        }
    }
    if periodic {
        if let Some(success) =
            find_sync_condition(&prior.conditions, SyncConditionType::ApplySuccess)
        {
            let since = Utc::now() - success.last_probe_time;
            if since > chrono::Duration::hours(REAPPLY_INTERVAL_HOURS) {
                return true;
            }
        }
    }
    false
}

/// Apply a bundle's resources in declaration order
async fn apply_bundle_resources(
    applier: &dyn Applier,
    deleter: &dyn DynamicDelete,
    apply_mode: ResourceApplyMode,
    resources: &[serde_json::Value],
    entry: &mut SyncSetObjectStatus,
) -> Result<()> {
    let mut raws = Vec::with_capacity(resources.len());
    for resource in resources {
        let raw = serde_json::to_vec(resource)
            .map_err(|e| Error::serialization(format!("failed to serialize resource: {}", e)))?;
        raws.push(raw);
    }

    // Gather identity for every resource before applying any of them.
    let mut infos = Vec::with_capacity(raws.len());
    for (index, raw) in raws.iter().enumerate() {
        match applier.info(raw) {
            Ok(info) => infos.push(info),
            Err(err) => {
                entry.conditions = set_unknown_object_condition(
                    std::mem::take(&mut entry.conditions),
                    Some(&err),
                    index,
                );
                return Err(err);
            }
        }
    }
    entry.conditions =
        set_unknown_object_condition(std::mem::take(&mut entry.conditions), None, 0);

    let mut new_status_list: Vec<SyncStatus> = Vec::new();
    let mut apply_err: Option<Error> = None;

    for (raw, resource_info) in raws.iter().zip(infos.iter()) {
        let mut resource_status = SyncStatus {
            api_version: resource_info.api_version.clone(),
            kind: resource_info.kind.clone(),
            resource: resource_info.resource.clone(),
            name: resource_info.name.clone(),
            namespace: resource_info.namespace.clone(),
            hash: resource_hash(raw),
            conditions: vec![],
        };

        let prior = entry
            .resources
            .iter()
            .find(|rss| rss.same_resource(&resource_status));
        let carried = prior.map(|p| p.conditions.clone()).unwrap_or_default();

        if should_reapply(prior, &resource_status.hash, true) {
            debug!(
                kind = %resource_status.kind,
                name = %resource_status.name,
                "applying resource"
            );
            match applier.apply(raw).await {
                Ok(result) => {
                    debug!(
                        kind = %resource_status.kind,
                        name = %resource_status.name,
                        %result,
                        "resource applied"
                    );
                    resource_status.conditions = set_apply_conditions(carried, None);
                }
                Err(err) => {
                    error!(
                        kind = %resource_status.kind,
                        name = %resource_status.name,
                        error = %err,
                        "error applying resource"
                    );
                    resource_status.conditions = set_apply_conditions(carried, Some(&err));
                    apply_err = Some(err);
                }
            }
        } else {
            debug!(
                kind = %resource_status.kind,
                name = %resource_status.name,
                "resource has not changed, will not apply"
            );
            resource_status.conditions = carried;
        }

        new_status_list.push(resource_status);

        // An apply error stops processing of the remaining resources.
        if apply_err.is_some() {
            break;
        }
    }

    entry.resources = reconcile_deleted_resources(
        apply_mode,
        deleter,
        &entry.resources,
        new_status_list,
        apply_err.is_some(),
    )
    .await;

    match apply_err {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Delete resources that left the bundle's desired set
///
/// Upsert mode never deletes. In sync mode, records present in the prior
/// status but absent from the new list are deleted on the managed cluster;
/// a pending apply error defers deletion to the next pass by retaining the
/// candidates.
async fn reconcile_deleted_resources(
    apply_mode: ResourceApplyMode,
    deleter: &dyn DynamicDelete,
    existing: &[SyncStatus],
    mut new_list: Vec<SyncStatus>,
    had_apply_err: bool,
) -> Vec<SyncStatus> {
    debug!(
        existing = existing.len(),
        actual = new_list.len(),
        "reconciling deleted syncset resources"
    );
    if apply_mode == ResourceApplyMode::Upsert {
        debug!("apply mode is upsert, syncset status will be updated");
        return new_list;
    }

    let mut candidates: Vec<SyncStatus> = existing
        .iter()
        .filter(|existing_status| {
            !new_list
                .iter()
                .any(|new_status| existing_status.same_resource(new_status))
        })
        .cloned()
        .collect();

    if had_apply_err {
        debug!("an error occurred applying resources, will preserve all syncset status items");
        new_list.extend(candidates);
        return new_list;
    }

    for candidate in &mut candidates {
        debug!(
            kind = %candidate.kind,
            name = %candidate.name,
            "deleting resource no longer in sync set"
        );
        match deleter
            .delete(
                &candidate.api_version,
                &candidate.kind,
                &candidate.resource,
                candidate.namespace.as_deref().unwrap_or_default(),
                &candidate.name,
            )
            .await
        {
            Ok(DeleteOutcome::Deleted) => {}
            Ok(DeleteOutcome::NotFound) => {
                debug!(name = %candidate.name, "resource not found, nothing to do");
            }
            Err(err) => {
                error!(
                    kind = %candidate.kind,
                    name = %candidate.name,
                    error = %err,
                    "error deleting resource"
                );
                candidate.conditions = set_deletion_failed_condition(
                    std::mem::take(&mut candidate.conditions),
                    &err,
                );
                // Retain the record so deletion is retried next pass.
                new_list.push(candidate.clone());
            }
        }
    }

    new_list
}

/// Apply a bundle's patches after its resources
async fn apply_bundle_patches(
    applier: &dyn Applier,
    patches: &[SyncObjectPatch],
    entry: &mut SyncSetObjectStatus,
) -> Result<()> {
    for patch in patches {
        let mut patch_status = SyncStatus {
            api_version: patch.api_version.clone(),
            kind: patch.kind.clone(),
            resource: String::new(),
            name: patch.name.clone(),
            namespace: patch.namespace.clone(),
            hash: resource_hash(patch.patch.as_bytes()),
            conditions: vec![],
        };

        let prior = entry
            .patches
            .iter()
            .find(|pss| pss.same_patch_target(&patch_status));
        let carried = prior.map(|p| p.conditions.clone()).unwrap_or_default();
        let periodic = patch.apply_mode != PatchApplyMode::ApplyOnce;

        if should_reapply(prior, &patch_status.hash, periodic) {
            debug!(kind = %patch.kind, name = %patch.name, "applying patch");
            let result = applier
                .patch(
                    &patch.name,
                    patch.namespace.as_deref().unwrap_or_default(),
                    &patch.kind,
                    &patch.api_version,
                    patch.patch.as_bytes(),
                    &patch.patch_type,
                )
                .await;
            patch_status.conditions = set_apply_conditions(carried, result.as_ref().err());
            append_or_update_sync_status(&mut entry.patches, patch_status);
            // The first patch error short-circuits the bundle's patch loop.
            result?;
        } else {
            debug!(
                kind = %patch.kind,
                name = %patch.name,
                "patch has not changed, will not apply"
            );
        }
    }
    Ok(())
}

/// Delete a deleted bundle's recorded resources on the managed cluster
///
/// Failures are logged only; cleanup is retried on subsequent reconciles
/// while the bundle's finalizer removal has not yet succeeded.
async fn delete_bundle_resources(entry: &SyncSetObjectStatus, deleter: &dyn DynamicDelete) {
    for resource_status in &entry.resources {
        debug!(
            kind = %resource_status.kind,
            name = %resource_status.name,
            "deleting resource of deleted sync set"
        );
        match deleter
            .delete(
                &resource_status.api_version,
                &resource_status.kind,
                &resource_status.resource,
                resource_status.namespace.as_deref().unwrap_or_default(),
                &resource_status.name,
            )
            .await
        {
            Ok(DeleteOutcome::Deleted) => {}
            Ok(DeleteOutcome::NotFound) => {
                debug!(name = %resource_status.name, "resource not found, nothing to do");
            }
            Err(err) => {
                error!(
                    kind = %resource_status.kind,
                    name = %resource_status.name,
                    error = %err,
                    "error deleting resource"
                );
            }
        }
    }
}

fn set_unknown_object_condition(
    conditions: Vec<SyncCondition>,
    err: Option<&Error>,
    index: usize,
) -> Vec<SyncCondition> {
    let (status, reason, message) = match err {
        Some(err) => (
            ConditionStatus::True,
            UNKNOWN_OBJECT_FOUND_REASON,
            format!(
                "Unable to gather Info for SyncSet resource at index {} in resources: {}",
                index, err
            ),
        ),
        None => (
            ConditionStatus::False,
            UNKNOWN_OBJECT_NOT_FOUND_REASON,
            "Info available for all SyncSet resources".to_string(),
        ),
    };
    set_sync_condition(
        conditions,
        SyncConditionType::UnknownObject,
        status,
        reason,
        message,
        UpdateConditionCheck::Never,
    )
}

fn set_apply_conditions(
    mut conditions: Vec<SyncCondition>,
    err: Option<&Error>,
) -> Vec<SyncCondition> {
    let (reason, message, success_status, failure_status, check) = match err {
        None => (
            APPLY_SUCCEEDED_REASON,
            "Apply successful",
            ConditionStatus::True,
            ConditionStatus::False,
            UpdateConditionCheck::Always,
        ),
        // The raw apply error embeds a temp filename which changes on every
        // attempt; recording it would update status and re-reconcile in a
        // hot loop. The message must be content-stable for identical
        // failures.
        Some(_) => (
            APPLY_FAILED_REASON,
            "Apply failed",
            ConditionStatus::False,
            ConditionStatus::True,
            UpdateConditionCheck::IfReasonOrMessageChange,
        ),
    };

    conditions = set_sync_condition(
        conditions,
        SyncConditionType::ApplySuccess,
        success_status,
        reason,
        message,
        check,
    );
    conditions = set_sync_condition(
        conditions,
        SyncConditionType::ApplyFailure,
        failure_status,
        reason,
        message,
        check,
    );
    // Reporting an apply outcome means we no longer want to delete this
    // object; clear any previous deletion failure.
    set_sync_condition(
        conditions,
        SyncConditionType::DeletionFailed,
        ConditionStatus::False,
        reason,
        message,
        check,
    )
}

fn set_deletion_failed_condition(
    conditions: Vec<SyncCondition>,
    err: &Error,
) -> Vec<SyncCondition> {
    set_sync_condition(
        conditions,
        SyncConditionType::DeletionFailed,
        ConditionStatus::True,
        DELETION_FAILED_REASON,
        format!("Failed to delete resource: {}", err),
        UpdateConditionCheck::Always,
    )
}

fn find_sync_set_object_status(name: &str, list: &[SyncSetObjectStatus]) -> SyncSetObjectStatus {
    list.iter()
        .find(|entry| entry.name == name)
        .cloned()
        .unwrap_or_else(|| SyncSetObjectStatus {
            name: name.to_string(),
            ..Default::default()
        })
}

fn append_or_update_sync_set_object_status(
    list: &mut Vec<SyncSetObjectStatus>,
    entry: SyncSetObjectStatus,
) {
    match list.iter_mut().find(|existing| existing.name == entry.name) {
        Some(existing) => *existing = entry,
        None => list.push(entry),
    }
}

fn remove_sync_set_object_status(list: &mut Vec<SyncSetObjectStatus>, name: &str) {
    list.retain(|entry| entry.name != name);
}

fn append_or_update_sync_status(list: &mut Vec<SyncStatus>, status: SyncStatus) {
    match list
        .iter_mut()
        .find(|existing| existing.same_patch_target(&status))
    {
        Some(existing) => *existing = status,
        None => list.push(status),
    }
}

/// SyncSets in the ClusterDeployment's namespace naming it in their refs
async fn related_syncsets(
    ctx: &Context,
    cd: &ClusterDeployment,
    namespace: &str,
) -> Result<Vec<SyncSet>> {
    let name = cd.name_any();
    let all = ctx.kube.list_syncsets(namespace).await?;
    Ok(all
        .into_iter()
        .filter(|syncset| {
            syncset
                .spec
                .cluster_deployment_refs
                .iter()
                .any(|cd_ref| cd_ref.name == name)
        })
        .collect())
}

/// SelectorSyncSets whose label selector matches the ClusterDeployment
async fn related_selector_syncsets(
    ctx: &Context,
    cd: &ClusterDeployment,
) -> Result<Vec<SelectorSyncSet>> {
    let all = ctx.kube.list_selector_syncsets().await?;
    let labels = cd.labels();
    Ok(all
        .into_iter()
        .filter(|syncset| {
            match selector_matches(&syncset.spec.cluster_deployment_selector, labels) {
                Ok(matched) => matched,
                Err(err) => {
                    error!(
                        selector_sync_set = %syncset.name_any(),
                        error = %err,
                        "unable to convert selector"
                    );
                    false
                }
            }
        })
        .collect())
}

/// Evaluate a label selector against a label set
///
/// Supports matchLabels plus the In, NotIn, Exists, and DoesNotExist
/// matchExpressions operators. An unknown operator is an error.
pub fn selector_matches(
    selector: &LabelSelector,
    labels: &BTreeMap<String, String>,
) -> Result<bool> {
    if let Some(match_labels) = &selector.match_labels {
        for (key, value) in match_labels {
            if labels.get(key) != Some(value) {
                return Ok(false);
            }
        }
    }

    if let Some(expressions) = &selector.match_expressions {
        for expression in expressions {
            let value = labels.get(&expression.key);
            let values = expression.values.as_deref().unwrap_or_default();
            let matched = match expression.operator.as_str() {
                "In" => value.map(|v| values.contains(v)).unwrap_or(false),
                "NotIn" => value.map(|v| !values.contains(v)).unwrap_or(true),
                "Exists" => value.is_some(),
                "DoesNotExist" => value.is_none(),
                other => {
                    return Err(Error::serialization(format!(
                        "invalid label selector operator: {}",
                        other
                    )))
                }
            };
            if !matched {
                return Ok(false);
            }
        }
    }

    Ok(true)
}

/// Map a changed SyncSet to the ClusterDeployments it targets
pub fn syncset_cluster_deployments(syncset: &SyncSet) -> Vec<ObjectRef<ClusterDeployment>> {
    let Some(namespace) = syncset.namespace() else {
        return vec![];
    };
    syncset
        .spec
        .cluster_deployment_refs
        .iter()
        .map(|cd_ref| ObjectRef::new(&cd_ref.name).within(&namespace))
        .collect()
}

/// Map a changed SelectorSyncSet to the ClusterDeployments it matches
///
/// Evaluates the selector against every known ClusterDeployment; malformed
/// selectors are logged and produce no requests.
pub fn selector_syncset_cluster_deployments(
    syncset: &SelectorSyncSet,
    cluster_deployments: &[Arc<ClusterDeployment>],
) -> Vec<ObjectRef<ClusterDeployment>> {
    let mut requests = Vec::new();
    for cd in cluster_deployments {
        match selector_matches(&syncset.spec.cluster_deployment_selector, cd.labels()) {
            Ok(true) => requests.push(ObjectRef::from_obj(cd.as_ref())),
            Ok(false) => {}
            Err(err) => {
                warn!(
                    selector_sync_set = %syncset.name_any(),
                    error = %err,
                    "dropping fan-out for malformed selector"
                );
                return vec![];
            }
        }
    }
    requests
}

/// Load a key from a secret, failing when the secret or key is absent
async fn load_secret_data(
    ctx: &Context,
    namespace: &str,
    secret_name: &str,
    key: &str,
) -> Result<Vec<u8>> {
    let secret = ctx
        .kube
        .get_secret(namespace, secret_name)
        .await?
        .ok_or_else(|| Error::SecretNotFound {
            namespace: namespace.to_string(),
            secret: secret_name.to_string(),
        })?;
    let data = secret
        .data
        .as_ref()
        .and_then(|data| data.get(key))
        .ok_or_else(|| Error::missing_secret_key(secret_name, key))?;
    Ok(data.0.clone())
}

fn migrated_patch_type(patch_type: &str) -> Option<&'static str> {
    match patch_type {
        "application/json-patch+json" => Some("json"),
        "application/merge-patch+json" => Some("merge"),
        "application/strategic-merge-patch+json" => Some("strategic"),
        _ => None,
    }
}

/// Rewrite legacy content-type patch spellings on SyncSets in place
///
/// Idempotent; bundles already using the short spellings are not written.
async fn migrate_syncset_patch_types(ctx: &Context, syncsets: &mut [SyncSet]) -> Result<()> {
    for syncset in syncsets.iter_mut() {
        if syncset.spec.patches.is_empty() {
            continue;
        }
        let mut migrated = false;
        for patch in &mut syncset.spec.patches {
            if let Some(new_type) = migrated_patch_type(&patch.patch_type) {
                patch.patch_type = new_type.to_string();
                migrated = true;
            }
        }
        if migrated {
            info!(
                sync_set = %syncset.name_any(),
                "migrating syncset with outdated patch type"
            );
            ctx.kube.update_syncset(syncset).await?;
        }
    }
    Ok(())
}

/// Rewrite legacy content-type patch spellings on SelectorSyncSets in place
async fn migrate_selector_syncset_patch_types(
    ctx: &Context,
    syncsets: &mut [SelectorSyncSet],
) -> Result<()> {
    for syncset in syncsets.iter_mut() {
        if syncset.spec.patches.is_empty() {
            continue;
        }
        let mut migrated = false;
        for patch in &mut syncset.spec.patches {
            if let Some(new_type) = migrated_patch_type(&patch.patch_type) {
                patch.patch_type = new_type.to_string();
                migrated = true;
            }
        }
        if migrated {
            info!(
                selector_sync_set = %syncset.name_any(),
                "migrating selector syncset with outdated patch type"
            );
            ctx.kube.update_selector_syncset(syncset).await?;
        }
    }
    Ok(())
}
