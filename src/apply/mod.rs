//! Contracts for acting on managed clusters
//!
//! The sync engine never talks to a managed cluster directly; it goes
//! through the [`Applier`] and [`DynamicDelete`] traits so tests can mock
//! the remote side. The real implementations wrap a [`kube::Client`] built
//! from the cluster's admin kubeconfig and use server-side apply.

use std::sync::Arc;

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, DynamicObject, Patch, PatchParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::discovery::ApiResource;
use kube::{Client, Config};
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::{Error, Result, FIELD_MANAGER};

/// Identity of a serialized object, extracted without applying it
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceInfo {
    /// API version, e.g. `apps/v1`
    pub api_version: String,
    /// Kind, e.g. `Deployment`
    pub kind: String,
    /// Plural resource name, e.g. `deployments`
    pub resource: String,
    /// Object name
    pub name: String,
    /// Object namespace, if namespaced
    pub namespace: Option<String>,
}

/// Outcome of applying a serialized object
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyResult {
    /// The object did not exist and was created
    Created,
    /// The object existed and was updated
    Configured,
    /// The object existed and the apply changed nothing
    Unchanged,
}

impl std::fmt::Display for ApplyResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Configured => write!(f, "configured"),
            Self::Unchanged => write!(f, "unchanged"),
        }
    }
}

/// Outcome of a dynamic delete
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The object was deleted
    Deleted,
    /// The object was already gone
    NotFound,
}

/// Applies serialized objects and patches to a managed cluster
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Applier: Send + Sync {
    /// Extract the identity of a serialized object without applying it
    fn info(&self, obj: &[u8]) -> Result<ResourceInfo>;

    /// Apply a serialized object to the managed cluster
    async fn apply(&self, obj: &[u8]) -> Result<ApplyResult>;

    /// Patch an object on the managed cluster
    ///
    /// `patch_type` is one of `json`, `merge`, or `strategic`. An empty
    /// `namespace` targets a cluster-scoped object.
    async fn patch(
        &self,
        name: &str,
        namespace: &str,
        kind: &str,
        api_version: &str,
        patch: &[u8],
        patch_type: &str,
    ) -> Result<()>;
}

/// Deletes objects on a managed cluster by group-version-resource
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DynamicDelete: Send + Sync {
    /// Delete the named object, distinguishing NotFound from real failures
    ///
    /// An empty `namespace` targets a cluster-scoped object.
    async fn delete(
        &self,
        api_version: &str,
        kind: &str,
        resource: &str,
        namespace: &str,
        name: &str,
    ) -> Result<DeleteOutcome>;
}

/// Builds per-cluster [`Applier`] and [`DynamicDelete`] instances from an
/// admin kubeconfig
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RemoteClusterBuilder: Send + Sync {
    /// Build an applier for the cluster identified by the kubeconfig
    async fn applier(&self, kubeconfig: &[u8]) -> Result<Arc<dyn Applier>>;

    /// Build a dynamic-delete client for the cluster identified by the
    /// kubeconfig
    async fn deleter(&self, kubeconfig: &[u8]) -> Result<Arc<dyn DynamicDelete>>;
}

/// Parse apiVersion into (group, version)
fn parse_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

/// Simple pluralization for Kubernetes resource kinds
fn pluralize(kind: &str) -> String {
    let lower = kind.to_lowercase();
    if lower.ends_with('s') {
        format!("{}es", lower)
    } else if lower.ends_with('y') {
        format!("{}ies", &lower[..lower.len() - 1])
    } else {
        format!("{}s", lower)
    }
}

/// A serialized object parsed into its value and identity
#[derive(Debug)]
struct ParsedManifest {
    value: serde_json::Value,
    info: ResourceInfo,
    api_resource: ApiResource,
}

/// Parse a serialized object and extract its identity
///
/// Accepts JSON or YAML; sync-set resource blobs arrive as JSON.
fn parse_manifest(obj: &[u8]) -> Result<ParsedManifest> {
    let text = std::str::from_utf8(obj)
        .map_err(|e| Error::unknown_object(format!("resource is not valid UTF-8: {}", e)))?;

    let value: serde_json::Value = if text.trim_start().starts_with('{') {
        serde_json::from_str(text)
            .map_err(|e| Error::unknown_object(format!("failed to parse resource as JSON: {}", e)))?
    } else {
        serde_yaml::from_str(text)
            .map_err(|e| Error::unknown_object(format!("failed to parse resource as YAML: {}", e)))?
    };

    let api_version = value
        .get("apiVersion")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::unknown_object("resource missing apiVersion"))?
        .to_string();

    let kind = value
        .get("kind")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::unknown_object("resource missing kind"))?
        .to_string();

    let name = value
        .pointer("/metadata/name")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::unknown_object("resource missing metadata.name"))?
        .to_string();

    let namespace = value
        .pointer("/metadata/namespace")
        .and_then(|v| v.as_str())
        .map(str::to_string);

    let (group, version) = parse_api_version(&api_version);
    let plural = pluralize(&kind);

    let api_resource = ApiResource {
        group,
        version,
        api_version: api_version.clone(),
        kind: kind.clone(),
        plural: plural.clone(),
    };

    Ok(ParsedManifest {
        value,
        info: ResourceInfo {
            api_version,
            kind,
            resource: plural,
            name,
            namespace,
        },
        api_resource,
    })
}

/// Build a kube client from raw kubeconfig bytes
async fn client_from_kubeconfig(kubeconfig: &[u8]) -> Result<Client> {
    let text = std::str::from_utf8(kubeconfig)
        .map_err(|e| Error::serialization(format!("kubeconfig is not valid UTF-8: {}", e)))?;
    let kubeconfig = Kubeconfig::from_yaml(text)
        .map_err(|e| Error::serialization(format!("failed to parse kubeconfig: {}", e)))?;
    let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .map_err(|e| Error::serialization(format!("failed to load kubeconfig: {}", e)))?;
    Client::try_from(config).map_err(Error::Kube)
}

fn dynamic_api(client: &Client, ar: &ApiResource, namespace: Option<&str>) -> Api<DynamicObject> {
    match namespace {
        Some(ns) => Api::namespaced_with(client.clone(), ns, ar),
        None => Api::all_with(client.clone(), ar),
    }
}

/// Applier backed by a kube client against the managed cluster
pub struct KubeApplier {
    client: Client,
}

impl KubeApplier {
    /// Create an applier from an already-built client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Applier for KubeApplier {
    fn info(&self, obj: &[u8]) -> Result<ResourceInfo> {
        Ok(parse_manifest(obj)?.info)
    }

    async fn apply(&self, obj: &[u8]) -> Result<ApplyResult> {
        let manifest = parse_manifest(obj)?;
        let api = dynamic_api(&self.client, &manifest.api_resource, manifest.info.namespace.as_deref());

        let existing = api
            .get_opt(&manifest.info.name)
            .await
            .map_err(|e| Error::apply(e.to_string()))?;

        let applied = api
            .patch(
                &manifest.info.name,
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(&manifest.value),
            )
            .await
            .map_err(|e| Error::apply(e.to_string()))?;

        let result = match existing {
            None => ApplyResult::Created,
            Some(before) => {
                if before.metadata.resource_version == applied.metadata.resource_version {
                    ApplyResult::Unchanged
                } else {
                    ApplyResult::Configured
                }
            }
        };

        debug!(
            kind = %manifest.info.kind,
            name = %manifest.info.name,
            %result,
            "applied resource"
        );
        Ok(result)
    }

    async fn patch(
        &self,
        name: &str,
        namespace: &str,
        kind: &str,
        api_version: &str,
        patch: &[u8],
        patch_type: &str,
    ) -> Result<()> {
        let (group, version) = parse_api_version(api_version);
        let ar = ApiResource {
            group,
            version,
            api_version: api_version.to_string(),
            kind: kind.to_string(),
            plural: pluralize(kind),
        };
        let namespace = (!namespace.is_empty()).then_some(namespace);
        let api = dynamic_api(&self.client, &ar, namespace);

        match patch_type {
            "json" => {
                let ops: json_patch::Patch = serde_json::from_slice(patch)
                    .map_err(|e| Error::patch(format!("invalid json patch: {}", e)))?;
                api.patch(name, &PatchParams::default(), &Patch::<serde_json::Value>::Json(ops))
                    .await
                    .map_err(|e| Error::patch(e.to_string()))?;
            }
            "merge" => {
                let body: serde_json::Value = serde_json::from_slice(patch)
                    .map_err(|e| Error::patch(format!("invalid merge patch: {}", e)))?;
                api.patch(name, &PatchParams::default(), &Patch::Merge(&body))
                    .await
                    .map_err(|e| Error::patch(e.to_string()))?;
            }
            "strategic" => {
                let body: serde_json::Value = serde_json::from_slice(patch)
                    .map_err(|e| Error::patch(format!("invalid strategic patch: {}", e)))?;
                api.patch(name, &PatchParams::default(), &Patch::Strategic(&body))
                    .await
                    .map_err(|e| Error::patch(e.to_string()))?;
            }
            other => {
                return Err(Error::patch(format!("unsupported patch type: {}", other)));
            }
        }

        debug!(kind = %kind, name = %name, patch_type = %patch_type, "patched resource");
        Ok(())
    }
}

/// Dynamic-delete client backed by a kube client against the managed cluster
pub struct KubeDynamicDelete {
    client: Client,
}

impl KubeDynamicDelete {
    /// Create a delete client from an already-built client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DynamicDelete for KubeDynamicDelete {
    async fn delete(
        &self,
        api_version: &str,
        kind: &str,
        resource: &str,
        namespace: &str,
        name: &str,
    ) -> Result<DeleteOutcome> {
        let (group, version) = parse_api_version(api_version);
        let ar = ApiResource {
            group,
            version,
            api_version: api_version.to_string(),
            kind: kind.to_string(),
            plural: resource.to_string(),
        };
        let namespace = (!namespace.is_empty()).then_some(namespace);
        let api = dynamic_api(&self.client, &ar, namespace);

        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(DeleteOutcome::Deleted),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(DeleteOutcome::NotFound),
            Err(e) => Err(Error::deletion(e.to_string())),
        }
    }
}

/// Builds kube-backed appliers and delete clients from admin kubeconfigs
#[derive(Default)]
pub struct KubeRemoteClusterBuilder;

#[async_trait]
impl RemoteClusterBuilder for KubeRemoteClusterBuilder {
    async fn applier(&self, kubeconfig: &[u8]) -> Result<Arc<dyn Applier>> {
        let client = client_from_kubeconfig(kubeconfig).await?;
        Ok(Arc::new(KubeApplier::new(client)))
    }

    async fn deleter(&self, kubeconfig: &[u8]) -> Result<Arc<dyn DynamicDelete>> {
        let client = client_from_kubeconfig(kubeconfig).await?;
        Ok(Arc::new(KubeDynamicDelete::new(client)))
    }
}
