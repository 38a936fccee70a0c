//! Installer and uninstaller job generation
//!
//! Each ClusterDeployment maps deterministically to an installer batch job
//! plus a config map carrying the install configuration, and to an
//! uninstaller job used during deprovisioning. Both are owned by the
//! ClusterDeployment so garbage collection follows it.

use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, EnvVar, EnvVarSource, PodSpec, PodTemplateSpec,
    SecretKeySelector, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{Resource, ResourceExt};
use tracing::debug;

use crate::crd::ClusterDeployment;
use crate::{Error, Result};

/// Image run by installer jobs
pub const INSTALLER_IMAGE: &str = "registry.svc.ci.openshift.org/openshift/origin-v4.0:installer";

/// Image run by uninstaller jobs
// TODO: point at a dedicated uninstaller image once one is published.
pub const UNINSTALLER_IMAGE: &str = INSTALLER_IMAGE;

/// Data key in the install config map
pub const INSTALL_CONFIG_KEY: &str = "installconfig.yaml";

/// Path where the install config map is mounted in the installer pod
const INSTALLER_INPUT_PATH: &str = "/home/user/installerinput";

/// Secret key holding the AWS access key id
const AWS_ACCESS_KEY_ID_KEY: &str = "awsAccessKeyId";

/// Secret key holding the AWS secret access key
const AWS_SECRET_ACCESS_KEY_KEY: &str = "awsSecretAccessKey";

/// Name of the install job and config map for a ClusterDeployment
pub fn install_job_name(cd: &ClusterDeployment) -> String {
    format!("{}-install", cd.name_any())
}

/// Name of the uninstall job for a ClusterDeployment
pub fn uninstall_job_name(cd: &ClusterDeployment) -> String {
    format!("{}-uninstall", cd.name_any())
}

fn credential_env(cd: &ClusterDeployment) -> Vec<EnvVar> {
    let mut env = Vec::new();

    if let Some(aws) = cd
        .spec
        .platform_secrets
        .as_ref()
        .and_then(|s| s.aws.as_ref())
        .filter(|aws| !aws.credentials.name.is_empty())
    {
        let secret_ref = |key: &str| {
            Some(EnvVarSource {
                secret_key_ref: Some(SecretKeySelector {
                    name: aws.credentials.name.clone(),
                    key: key.to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            })
        };
        env.push(EnvVar {
            name: "AWS_ACCESS_KEY_ID".to_string(),
            value_from: secret_ref(AWS_ACCESS_KEY_ID_KEY),
            ..Default::default()
        });
        env.push(EnvVar {
            name: "AWS_SECRET_ACCESS_KEY".to_string(),
            value_from: secret_ref(AWS_SECRET_ACCESS_KEY_KEY),
            ..Default::default()
        });
    }

    env
}

/// Generate the installer (or uninstaller) job for a ClusterDeployment
///
/// Install jobs come with a config map carrying the YAML-serialized install
/// configuration; uninstall jobs have none. Callers stamp owner references
/// via [`set_owner`].
pub fn generate_installer_job(
    name: &str,
    cd: &ClusterDeployment,
    image: &str,
    uninstall: bool,
) -> Result<(Job, Option<ConfigMap>)> {
    debug!(cluster_deployment = %cd.name_any(), job = %name, "generating installer job");

    let namespace = cd.namespace();
    let env = credential_env(cd);

    let mut volumes = Vec::new();
    let mut volume_mounts = Vec::new();
    let mut config_map = None;

    if !uninstall {
        let install_config = serde_yaml::to_string(&cd.spec.config)
            .map_err(|e| Error::serialization(format!("failed to serialize install config: {}", e)))?;

        config_map = Some(ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: namespace.clone(),
                ..Default::default()
            },
            data: Some([(INSTALL_CONFIG_KEY.to_string(), install_config)].into()),
            ..Default::default()
        });

        volume_mounts.push(VolumeMount {
            name: "installconfig".to_string(),
            mount_path: INSTALLER_INPUT_PATH.to_string(),
            ..Default::default()
        });
        volumes.push(Volume {
            name: "installconfig".to_string(),
            config_map: Some(ConfigMapVolumeSource {
                name: name.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        });
    }

    let command = if uninstall {
        vec!["echo".to_string(), "this would have been an uninstall".to_string()]
    } else {
        vec![
            "cat".to_string(),
            format!("{}/{}", INSTALLER_INPUT_PATH, INSTALL_CONFIG_KEY),
        ]
    };

    let container = Container {
        name: "installer".to_string(),
        image: Some(image.to_string()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        env: Some(env),
        volume_mounts: Some(volume_mounts),
        command: Some(command),
        ..Default::default()
    };

    let job = Job {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace,
            ..Default::default()
        },
        spec: Some(JobSpec {
            completions: Some(1),
            active_deadline_seconds: Some(24 * 60 * 60),
            // Effectively limitless; the active deadline bounds the job.
            backoff_limit: Some(123456),
            template: PodTemplateSpec {
                metadata: None,
                spec: Some(PodSpec {
                    dns_policy: Some("ClusterFirst".to_string()),
                    restart_policy: Some("OnFailure".to_string()),
                    containers: vec![container],
                    volumes: Some(volumes),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    };

    Ok((job, config_map))
}

/// Stamp a controller owner reference to the ClusterDeployment on an object
pub fn set_owner(meta: &mut ObjectMeta, cd: &ClusterDeployment) {
    if let Some(owner_ref) = cd.controller_owner_ref(&()) {
        meta.owner_references = Some(vec![owner_ref]);
    }
}

/// Get the status of a typed condition on a job, defaulting to false when
/// the condition is absent
fn job_condition_status(job: &Job, condition_type: &str) -> bool {
    job.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == condition_type && c.status == "True")
        })
        .unwrap_or(false)
}

/// Whether the job has reported Complete
pub fn is_successful(job: &Job) -> bool {
    job_condition_status(job, "Complete")
}

/// Whether the job has reported Failed
pub fn is_failed(job: &Job) -> bool {
    job_condition_status(job, "Failed")
}
