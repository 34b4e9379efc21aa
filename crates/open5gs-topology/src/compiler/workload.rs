//! Deployment construction
//!
//! Every component gets the same Deployment skeleton. The UPF, the console
//! and the datastore add their own pod profile on top.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, DeploymentStrategy};
use k8s_openapi::api::core::v1::{
    Capabilities, ConfigMapVolumeSource, Container, ContainerPort, EnvVar, ExecAction, KeyToPath,
    PersistentVolumeClaimVolumeSource, PodSecurityContext, PodSpec, PodTemplateSpec, Probe,
    SecurityContext, TCPSocketAction, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use crate::component::{
    datastore_uri, resource_name, ComponentDescriptor, ComponentKind, EndpointSpec,
    METRICS_ENDPOINT,
};
use crate::normalize::NormalizedSpec;

use super::config::{config_file_name, MONGODB_SCRIPT_KEYS, UPF_ENTRYPOINT_KEY, WEBUI_ADD_ADMIN_KEY};
use super::Target;

const CONFIG_DIR: &str = "/opt/open5gs/etc/open5gs";
const CONFIG_VOLUME: &str = "config";
const ENTRYPOINT_VOLUME: &str = "entrypoint";
const DATA_VOLUME: &str = "datadir";

/// Non-root uid for network functions
const NF_USER: i64 = 1001;
/// Non-root uid baked into the console and datastore images
const DB_USER: i64 = 999;

/// Endpoints a component listens on given its settings
pub(crate) fn active_endpoints(
    descriptor: &ComponentDescriptor,
    metrics: bool,
) -> Vec<&'static EndpointSpec> {
    let mut endpoints: Vec<&'static EndpointSpec> = descriptor.endpoints.iter().collect();
    if metrics && descriptor.metrics_capable {
        endpoints.push(&METRICS_ENDPOINT);
    }
    endpoints
}

/// Build the Deployment of one component
pub(crate) fn build_workload(target: &Target<'_>, spec: &NormalizedSpec) -> Deployment {
    let kind = target.component;
    let descriptor = kind.descriptor();
    let settings = spec.settings(kind);
    let name = resource_name(target.parent, kind);
    let selector = target.selector_labels();

    let ports = active_endpoints(descriptor, settings.metrics)
        .into_iter()
        .map(|e| ContainerPort {
            name: Some(e.name.to_string()),
            container_port: e.port,
            protocol: Some(e.protocol.as_str().to_string()),
            ..Default::default()
        })
        .collect();

    let mut env = Vec::new();
    if descriptor.uses_datastore {
        env.push(env_var("DB_URI", &datastore_uri(target.parent)));
    }

    let mut container = Container {
        name: name.clone(),
        image: Some(spec.images.for_source(descriptor.image).to_string()),
        args: descriptor.command.map(|c| vec![c.to_string()]),
        ports: Some(ports),
        env: Some(env),
        volume_mounts: Some(vec![VolumeMount {
            name: CONFIG_VOLUME.to_string(),
            mount_path: format!("{CONFIG_DIR}/{}", config_file_name(kind)),
            sub_path: Some(config_file_name(kind)),
            ..Default::default()
        }]),
        security_context: Some(SecurityContext {
            run_as_non_root: Some(true),
            run_as_user: Some(NF_USER),
            ..Default::default()
        }),
        ..Default::default()
    };
    if descriptor.serves_sbi() {
        container.liveness_probe = Some(tcp_probe("sbi", 30, 10, 5));
        container.readiness_probe = Some(tcp_probe("sbi", 5, 5, 1));
    }

    let mut pod = PodSpec {
        service_account_name: Some(if settings.service_account {
            name.clone()
        } else {
            "default".to_string()
        }),
        containers: vec![container],
        volumes: Some(vec![config_volume(&name, None, None)]),
        security_context: Some(PodSecurityContext {
            fs_group: Some(NF_USER),
            ..Default::default()
        }),
        ..Default::default()
    };

    let mut recreate = false;
    match kind {
        ComponentKind::Upf => apply_upf_profile(&mut pod, &name),
        ComponentKind::WebUi => {
            apply_webui_profile(&mut pod, target.parent, &spec.images.datastore);
            recreate = true;
        }
        ComponentKind::MongoDb => {
            apply_datastore_profile(&mut pod, &name);
            recreate = true;
        }
        _ => {}
    }

    Deployment {
        metadata: target.metadata(&name, BTreeMap::new()),
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(selector.clone()),
                ..Default::default()
            },
            strategy: recreate.then(|| DeploymentStrategy {
                type_: Some("Recreate".to_string()),
                ..Default::default()
            }),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(selector),
                    ..Default::default()
                }),
                spec: Some(pod),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Privileged user plane: creates the `ogstun` device before the daemon starts
fn apply_upf_profile(pod: &mut PodSpec, bundle: &str) {
    let privileged = SecurityContext {
        capabilities: Some(Capabilities {
            add: Some(vec!["NET_ADMIN".to_string()]),
            ..Default::default()
        }),
        privileged: Some(true),
        run_as_non_root: Some(false),
        run_as_user: Some(0),
        run_as_group: Some(0),
        ..Default::default()
    };

    for container in &mut pod.containers {
        container.security_context = Some(privileged.clone());
    }

    pod.init_containers = Some(vec![Container {
        name: "tun-create".to_string(),
        image: pod.containers.first().and_then(|c| c.image.clone()),
        command: Some(vec![
            "/bin/bash".to_string(),
            "-c".to_string(),
            format!("/{UPF_ENTRYPOINT_KEY}"),
        ]),
        volume_mounts: Some(vec![VolumeMount {
            name: ENTRYPOINT_VOLUME.to_string(),
            mount_path: format!("/{UPF_ENTRYPOINT_KEY}"),
            sub_path: Some(UPF_ENTRYPOINT_KEY.to_string()),
            ..Default::default()
        }]),
        security_context: Some(privileged),
        ..Default::default()
    }]);

    pod.volumes = Some(vec![
        config_volume(bundle, Some(0o644), None),
        Volume {
            name: ENTRYPOINT_VOLUME.to_string(),
            ..config_volume(bundle, Some(0o777), Some(&[UPF_ENTRYPOINT_KEY]))
        },
    ]);
}

/// Console: seeds the admin account from the datastore image, then serves HTTP
fn apply_webui_profile(pod: &mut PodSpec, parent: &str, datastore_image: &str) {
    let db_uri = env_var("DB_URI", &datastore_uri(parent));

    if let Some(container) = pod.containers.first_mut() {
        container.volume_mounts = None;
        container.liveness_probe = Some(tcp_probe("http", 600, 10, 5));
        container.readiness_probe = Some(tcp_probe("http", 30, 5, 1));
        container.security_context = Some(SecurityContext {
            run_as_non_root: Some(true),
            run_as_user: Some(DB_USER),
            ..Default::default()
        });
    }

    pod.init_containers = Some(vec![Container {
        name: "init".to_string(),
        image: Some(datastore_image.to_string()),
        command: Some(vec![
            "/bin/bash".to_string(),
            format!("/{WEBUI_ADD_ADMIN_KEY}"),
        ]),
        env: Some(vec![db_uri]),
        volume_mounts: Some(vec![VolumeMount {
            name: CONFIG_VOLUME.to_string(),
            mount_path: format!("/{WEBUI_ADD_ADMIN_KEY}"),
            sub_path: Some(WEBUI_ADD_ADMIN_KEY.to_string()),
            ..Default::default()
        }]),
        ..Default::default()
    }]);
    pod.security_context = Some(PodSecurityContext {
        fs_group: Some(DB_USER),
        ..Default::default()
    });
}

/// Datastore: bitnami image with persistent data and exec probes
fn apply_datastore_profile(pod: &mut PodSpec, name: &str) {
    let env = [
        ("BITNAMI_DEBUG", "false"),
        ("ALLOW_EMPTY_PASSWORD", "yes"),
        ("MONGODB_SYSTEM_LOG_VERBOSITY", "0"),
        ("MONGODB_DISABLE_SYSTEM_LOG", "no"),
        ("MONGODB_DISABLE_JAVASCRIPT", "no"),
        ("MONGODB_ENABLE_JOURNAL", "yes"),
        ("MONGODB_PORT_NUMBER", "27017"),
        ("MONGODB_ENABLE_IPV6", "no"),
        ("MONGODB_ENABLE_DIRECTORY_PER_DB", "no"),
    ]
    .into_iter()
    .map(|(k, v)| env_var(k, v))
    .collect();

    if let Some(container) = pod.containers.first_mut() {
        container.env = Some(env);
        container.volume_mounts = Some(vec![
            VolumeMount {
                name: DATA_VOLUME.to_string(),
                mount_path: "/bitnami/mongodb".to_string(),
                ..Default::default()
            },
            VolumeMount {
                name: CONFIG_VOLUME.to_string(),
                mount_path: "/bitnami/scripts".to_string(),
                ..Default::default()
            },
        ]);
        container.liveness_probe = Some(exec_probe(MONGODB_SCRIPT_KEYS[0], 30, 20, 10));
        container.readiness_probe = Some(exec_probe(MONGODB_SCRIPT_KEYS[1], 5, 10, 5));
        container.startup_probe = None;
        container.security_context = Some(SecurityContext {
            run_as_non_root: Some(true),
            run_as_user: Some(DB_USER),
            ..Default::default()
        });
    }

    pod.volumes = Some(vec![
        Volume {
            name: DATA_VOLUME.to_string(),
            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                claim_name: name.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        },
        config_volume(name, Some(0o550), None),
    ]);
    pod.security_context = Some(PodSecurityContext {
        fs_group: Some(DB_USER),
        ..Default::default()
    });
}

fn config_volume(bundle: &str, mode: Option<i32>, keys: Option<&[&str]>) -> Volume {
    Volume {
        name: CONFIG_VOLUME.to_string(),
        config_map: Some(ConfigMapVolumeSource {
            name: bundle.to_string(),
            default_mode: mode,
            items: keys.map(|keys| {
                keys.iter()
                    .map(|k| KeyToPath {
                        key: k.to_string(),
                        path: k.to_string(),
                        ..Default::default()
                    })
                    .collect()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn env_var(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        ..Default::default()
    }
}

fn tcp_probe(port: &str, initial_delay: i32, period: i32, timeout: i32) -> Probe {
    Probe {
        tcp_socket: Some(TCPSocketAction {
            port: IntOrString::String(port.to_string()),
            ..Default::default()
        }),
        initial_delay_seconds: Some(initial_delay),
        period_seconds: Some(period),
        timeout_seconds: Some(timeout),
        failure_threshold: Some(5),
        success_threshold: Some(1),
        ..Default::default()
    }
}

fn exec_probe(script: &str, initial_delay: i32, period: i32, timeout: i32) -> Probe {
    Probe {
        exec: Some(ExecAction {
            command: Some(vec![
                "/bin/bash".to_string(),
                "-c".to_string(),
                format!("/bitnami/scripts/{script}"),
            ]),
        }),
        initial_delay_seconds: Some(initial_delay),
        period_seconds: Some(period),
        timeout_seconds: Some(timeout),
        failure_threshold: Some(6),
        ..Default::default()
    }
}
