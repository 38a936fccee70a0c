//! ClusterDeployment controller implementation
//!
//! Drives each ClusterDeployment through install and deprovision by
//! materializing batch jobs and observing their completion. The deprovision
//! finalizer guarantees the uninstall job runs to completion before the
//! declaration can disappear.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use tracing::{debug, error, info, instrument};

#[cfg(test)]
use mockall::automock;

use crate::crd::ClusterDeployment;
use crate::finalizer::{add_finalizer, has_finalizer, remove_finalizer};
use crate::install::{
    generate_installer_job, install_job_name, is_successful, set_owner, uninstall_job_name,
    INSTALLER_IMAGE, UNINSTALLER_IMAGE,
};
use crate::{Error, Result, FIELD_MANAGER, FINALIZER_DEPROVISION};

/// Trait abstracting Kubernetes client operations for the ClusterDeployment
/// controller
///
/// This trait allows mocking the Kubernetes client in tests while using
/// the real client in production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeClient: Send + Sync {
    /// Get a ConfigMap, returning None when it does not exist
    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>>;

    /// Create a ConfigMap
    async fn create_config_map(&self, config_map: &ConfigMap) -> Result<()>;

    /// Get a Job, returning None when it does not exist
    async fn get_job(&self, namespace: &str, name: &str) -> Result<Option<Job>>;

    /// Create a Job
    async fn create_job(&self, job: &Job) -> Result<()>;

    /// Replace a ClusterDeployment (used for finalizer changes)
    async fn update_cluster_deployment(&self, cd: &ClusterDeployment) -> Result<()>;

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
    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name).await.map_err(Error::Kube)
    }

    async fn create_config_map(&self, config_map: &ConfigMap) -> Result<()> {
        let namespace = config_map.namespace().unwrap_or_default();
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), &namespace);
        api.create(&PostParams::default(), config_map).await?;
        Ok(())
    }

    async fn get_job(&self, namespace: &str, name: &str) -> Result<Option<Job>> {
        let api: Api<Job> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name).await.map_err(Error::Kube)
    }

    async fn create_job(&self, job: &Job) -> Result<()> {
        let namespace = job.namespace().unwrap_or_default();
        let api: Api<Job> = Api::namespaced(self.client.clone(), &namespace);
        api.create(&PostParams::default(), job).await?;
        Ok(())
    }

    async fn update_cluster_deployment(&self, cd: &ClusterDeployment) -> Result<()> {
        let namespace = cd.namespace().unwrap_or_default();
        let api: Api<ClusterDeployment> = Api::namespaced(self.client.clone(), &namespace);
        api.replace(&cd.name_any(), &PostParams::default(), cd)
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
}

impl Context {
    /// Create a new controller context with the given Kubernetes client
    pub fn new(client: Client) -> Self {
        Self {
            kube: Arc::new(KubeClientImpl::new(client)),
        }
    }

    /// Create a new controller context with a custom client implementation
    ///
    /// This is primarily used for testing with mock clients.
    pub fn with_client(kube: Arc<dyn KubeClient>) -> Self {
        Self { kube }
    }
}

/// Reconcile a ClusterDeployment
///
/// Materializes the install config map and job, tracks install completion
/// into status, and handles deprovisioning when the deployment is deleted.
#[instrument(skip(cd, ctx), fields(cluster_deployment = %cd.name_any(), namespace = %cd.namespace().unwrap_or_default()))]
pub async fn reconcile(cd: Arc<ClusterDeployment>, ctx: Arc<Context>) -> Result<Action> {
    info!("reconciling cluster deployment");

    let namespace = cd.namespace().unwrap_or_default();
    let mut cd = (*cd).clone();
    let orig_status = cd.status.clone();

    let (mut job, mut config_map) =
        generate_installer_job(&install_job_name(&cd), &cd, INSTALLER_IMAGE, false)?;
    set_owner(&mut job.metadata, &cd);
    if let Some(cm) = config_map.as_mut() {
        set_owner(&mut cm.metadata, &cd);
    }

    if cd.metadata.deletion_timestamp.is_some() {
        if !has_finalizer(&cd, FINALIZER_DEPROVISION) {
            return Ok(Action::await_change());
        }
        return reconcile_deleted(&cd, &namespace, &ctx).await;
    }

    if !has_finalizer(&cd, FINALIZER_DEPROVISION) {
        debug!("adding deprovision finalizer");
        add_finalizer(&mut cd, FINALIZER_DEPROVISION);
        ctx.kube.update_cluster_deployment(&cd).await?;
        return Ok(Action::await_change());
    }

    if let Some(cm) = &config_map {
        if ctx
            .kube
            .get_config_map(&namespace, &cm.name_any())
            .await?
            .is_none()
        {
            info!(config_map = %cm.name_any(), "creating config map");
            ctx.kube.create_config_map(cm).await?;
        }
    }

    match ctx.kube.get_job(&namespace, &job.name_any()).await? {
        None => {
            info!(job = %job.name_any(), "creating install job");
            ctx.kube.create_job(&job).await?;
        }
        Some(existing) => {
            let mut status = cd.status.take().unwrap_or_default();
            status.installed = is_successful(&existing);
            debug!(installed = status.installed, "observed install job");
            cd.status = Some(status);
        }
    }

    if cd.status != orig_status {
        info!("status has changed, updating cluster deployment");
        ctx.kube.update_status(&cd).await?;
    }

    debug!("reconcile complete");
    Ok(Action::await_change())
}

/// Handle a ClusterDeployment with a deletion timestamp
///
/// Materializes the uninstall job and removes the deprovision finalizer
/// once it completes. Finalizer removal is the one and only lifecycle exit.
async fn reconcile_deleted(
    cd: &ClusterDeployment,
    namespace: &str,
    ctx: &Context,
) -> Result<Action> {
    let (mut uninstall_job, _) =
        generate_installer_job(&uninstall_job_name(cd), cd, UNINSTALLER_IMAGE, true)?;
    set_owner(&mut uninstall_job.metadata, cd);

    match ctx.kube.get_job(namespace, &uninstall_job.name_any()).await? {
        None => {
            info!(job = %uninstall_job.name_any(), "creating uninstall job");
            ctx.kube.create_job(&uninstall_job).await?;
            Ok(Action::await_change())
        }
        Some(existing) if is_successful(&existing) => {
            info!("uninstall job successful, removing finalizer");
            let mut cd = cd.clone();
            remove_finalizer(&mut cd, FINALIZER_DEPROVISION);
            ctx.kube.update_cluster_deployment(&cd).await?;
            Ok(Action::await_change())
        }
        Some(_) => {
            debug!("uninstall job not yet successful");
            Ok(Action::await_change())
        }
    }
}

/// Error policy for the controller
///
/// Called when reconciliation fails; requeues with a delay so transient
/// platform errors retry.
pub fn error_policy(cd: Arc<ClusterDeployment>, error: &Error, _ctx: Arc<Context>) -> Action {
    error!(
        ?error,
        cluster_deployment = %cd.name_any(),
        "reconciliation failed"
    );
    Action::requeue(Duration::from_secs(5))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{ClusterDeploymentSpec, ClusterDeploymentStatus};
    use k8s_openapi::api::batch::v1::{JobCondition, JobStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
    use std::sync::Mutex;

    fn sample_cluster_deployment(name: &str) -> ClusterDeployment {
        ClusterDeployment {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("acme".to_string()),
                uid: Some("uid-1".to_string()),
                ..Default::default()
            },
            spec: ClusterDeploymentSpec {
                cluster_name: name.to_string(),
                config: serde_json::json!({"baseDomain": "clusters.example.com"}),
                platform_secrets: None,
            },
            status: None,
        }
    }

    fn with_finalizer(mut cd: ClusterDeployment) -> ClusterDeployment {
        add_finalizer(&mut cd, FINALIZER_DEPROVISION);
        cd
    }

    fn deleting(mut cd: ClusterDeployment) -> ClusterDeployment {
        cd.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
        cd
    }

    fn complete_job() -> Job {
        Job {
            status: Some(JobStatus {
                conditions: Some(vec![JobCondition {
                    type_: "Complete".to_string(),
                    status: "True".to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Captures ClusterDeployment writes for verification without coupling
    /// tests to mock call matchers.
    #[derive(Clone, Default)]
    struct UpdateCapture {
        updates: Arc<Mutex<Vec<ClusterDeployment>>>,
    }

    impl UpdateCapture {
        fn record(&self, cd: &ClusterDeployment) {
            self.updates.lock().unwrap().push(cd.clone());
        }

        fn last(&self) -> Option<ClusterDeployment> {
            self.updates.lock().unwrap().last().cloned()
        }
    }

    /// Story: the first time a ClusterDeployment is observed, the controller
    /// only adds the deprovision finalizer and waits for the resulting
    /// watch event before doing anything else.
    #[tokio::test]
    async fn first_reconcile_adds_finalizer_and_returns() {
        let cd = Arc::new(sample_cluster_deployment("c1"));
        let capture = UpdateCapture::default();
        let capture_clone = capture.clone();

        let mut mock = MockKubeClient::new();
        mock.expect_update_cluster_deployment().returning(move |cd| {
            capture_clone.record(cd);
            Ok(())
        });
        let ctx = Arc::new(Context::with_client(Arc::new(mock)));

        let action = reconcile(cd, ctx).await.expect("reconcile should succeed");

        assert_eq!(action, Action::await_change());
        let written = capture.last().expect("cluster deployment written");
        assert!(has_finalizer(&written, FINALIZER_DEPROVISION));
    }

    /// Story: with the finalizer in place and nothing materialized yet, the
    /// controller creates the install config map and job, both named
    /// `<cd>-install` and owned by the ClusterDeployment.
    #[tokio::test]
    async fn install_artifacts_are_created_when_absent() {
        let cd = Arc::new(with_finalizer(sample_cluster_deployment("c1")));

        let created_cm: Arc<Mutex<Option<ConfigMap>>> = Arc::default();
        let created_job: Arc<Mutex<Option<Job>>> = Arc::default();

        let mut mock = MockKubeClient::new();
        mock.expect_get_config_map().returning(|_, _| Ok(None));
        let cm_slot = created_cm.clone();
        mock.expect_create_config_map().returning(move |cm| {
            *cm_slot.lock().unwrap() = Some(cm.clone());
            Ok(())
        });
        mock.expect_get_job().returning(|_, _| Ok(None));
        let job_slot = created_job.clone();
        mock.expect_create_job().returning(move |job| {
            *job_slot.lock().unwrap() = Some(job.clone());
            Ok(())
        });
        let ctx = Arc::new(Context::with_client(Arc::new(mock)));

        reconcile(cd, ctx).await.expect("reconcile should succeed");

        let cm = created_cm.lock().unwrap().clone().expect("config map created");
        assert_eq!(cm.name_any(), "c1-install");
        assert!(cm
            .data
            .as_ref()
            .unwrap()
            .contains_key("installconfig.yaml"));
        assert_eq!(
            cm.metadata.owner_references.as_ref().unwrap()[0].kind,
            "ClusterDeployment"
        );

        let job = created_job.lock().unwrap().clone().expect("job created");
        assert_eq!(job.name_any(), "c1-install");
        assert_eq!(
            job.metadata.owner_references.as_ref().unwrap()[0].name,
            "c1"
        );
    }

    /// Story: once the install job reports Complete, installed=true is
    /// persisted to status.
    #[tokio::test]
    async fn job_completion_marks_cluster_installed() {
        let cd = Arc::new(with_finalizer(sample_cluster_deployment("c1")));
        let capture = UpdateCapture::default();
        let capture_clone = capture.clone();

        let mut mock = MockKubeClient::new();
        mock.expect_get_config_map()
            .returning(|_, _| Ok(Some(ConfigMap::default())));
        mock.expect_get_job().returning(|_, _| Ok(Some(complete_job())));
        mock.expect_update_status().returning(move |cd| {
            capture_clone.record(cd);
            Ok(())
        });
        let ctx = Arc::new(Context::with_client(Arc::new(mock)));

        reconcile(cd, ctx).await.expect("reconcile should succeed");

        let written = capture.last().expect("status written");
        assert!(written.status.unwrap().installed);
    }

    /// Story: a quiet reconcile with an incomplete job and unchanged status
    /// writes nothing. The mock has no update expectations, so any write
    /// would panic the test.
    #[tokio::test]
    async fn unchanged_status_is_not_rewritten() {
        let mut cd = with_finalizer(sample_cluster_deployment("c1"));
        cd.status = Some(ClusterDeploymentStatus::default());
        let cd = Arc::new(cd);

        let mut mock = MockKubeClient::new();
        mock.expect_get_config_map()
            .returning(|_, _| Ok(Some(ConfigMap::default())));
        mock.expect_get_job().returning(|_, _| Ok(Some(Job::default())));
        let ctx = Arc::new(Context::with_client(Arc::new(mock)));

        let action = reconcile(cd, ctx).await.expect("reconcile should succeed");
        assert_eq!(action, Action::await_change());
    }

    /// Story: a deleting ClusterDeployment without the deprovision finalizer
    /// is invisible to the controller.
    #[tokio::test]
    async fn deleting_without_finalizer_is_ignored() {
        let cd = Arc::new(deleting(sample_cluster_deployment("c1")));
        let mock = MockKubeClient::new();
        let ctx = Arc::new(Context::with_client(Arc::new(mock)));

        let action = reconcile(cd, ctx).await.expect("reconcile should succeed");
        assert_eq!(action, Action::await_change());
    }

    /// Story: deprovisioning creates the uninstall job and never touches the
    /// install job. The get_job expectation asserts the uninstall name.
    #[tokio::test]
    async fn deprovision_creates_uninstall_job_only() {
        let cd = Arc::new(deleting(with_finalizer(sample_cluster_deployment("c1"))));
        let created_job: Arc<Mutex<Option<Job>>> = Arc::default();

        let mut mock = MockKubeClient::new();
        mock.expect_get_job()
            .withf(|_, name| name == "c1-uninstall")
            .returning(|_, _| Ok(None));
        let job_slot = created_job.clone();
        mock.expect_create_job().returning(move |job| {
            *job_slot.lock().unwrap() = Some(job.clone());
            Ok(())
        });
        let ctx = Arc::new(Context::with_client(Arc::new(mock)));

        reconcile(cd, ctx).await.expect("reconcile should succeed");

        let job = created_job.lock().unwrap().clone().expect("job created");
        assert_eq!(job.name_any(), "c1-uninstall");
        // Uninstall jobs carry no install config volume.
        let pod = job.spec.unwrap().template.spec.unwrap();
        assert!(pod.volumes.as_ref().unwrap().is_empty());
    }

    /// Story: an unfinished uninstall job leaves the finalizer alone; the
    /// controller waits for the next job event.
    #[tokio::test]
    async fn unfinished_uninstall_keeps_finalizer() {
        let cd = Arc::new(deleting(with_finalizer(sample_cluster_deployment("c1"))));

        let mut mock = MockKubeClient::new();
        mock.expect_get_job().returning(|_, _| Ok(Some(Job::default())));
        let ctx = Arc::new(Context::with_client(Arc::new(mock)));

        let action = reconcile(cd, ctx).await.expect("reconcile should succeed");
        assert_eq!(action, Action::await_change());
    }

    /// Story: once the uninstall job reports Complete, the deprovision
    /// finalizer is removed and the object can be garbage collected.
    #[tokio::test]
    async fn completed_uninstall_removes_finalizer() {
        let cd = Arc::new(deleting(with_finalizer(sample_cluster_deployment("c1"))));
        let capture = UpdateCapture::default();
        let capture_clone = capture.clone();

        let mut mock = MockKubeClient::new();
        mock.expect_get_job().returning(|_, _| Ok(Some(complete_job())));
        mock.expect_update_cluster_deployment().returning(move |cd| {
            capture_clone.record(cd);
            Ok(())
        });
        let ctx = Arc::new(Context::with_client(Arc::new(mock)));

        reconcile(cd, ctx).await.expect("reconcile should succeed");

        let written = capture.last().expect("cluster deployment written");
        assert!(!has_finalizer(&written, FINALIZER_DEPROVISION));
    }

    /// Story: platform errors propagate so the controller backs off and
    /// retries.
    #[tokio::test]
    async fn platform_errors_propagate_for_retry() {
        let cd = Arc::new(with_finalizer(sample_cluster_deployment("c1")));

        let mut mock = MockKubeClient::new();
        mock.expect_get_config_map()
            .returning(|_, _| Err(Error::apply("connection refused")));
        let ctx = Arc::new(Context::with_client(Arc::new(mock)));

        let result = reconcile(cd, ctx).await;
        assert!(result.is_err());
    }

    #[rstest::rstest]
    #[case::apply_error(Error::apply("server unavailable"))]
    #[case::deletion_error(Error::deletion("webhook denied"))]
    #[case::serialization_error(Error::serialization("bad install config"))]
    fn error_policy_requeues_with_backoff(#[case] error: Error) {
        let cd = Arc::new(sample_cluster_deployment("c1"));
        let ctx = Arc::new(Context::with_client(Arc::new(MockKubeClient::new())));

        let action = error_policy(cd, &error, ctx);
        assert_eq!(action, Action::requeue(Duration::from_secs(5)));
    }
}
