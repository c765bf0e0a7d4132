#![allow(dead_code)]

use sifpod::sifpod::k8s::container::{
    ContainerConfig, ContainerMetadata, CreateContainerRequest, ImageSpec, LinuxContainerConfig,
    LinuxContainerSecurityContext, Mount,
};
use sifpod::sifpod::k8s::pod::{
    LinuxPodSandboxConfig, LinuxSandboxSecurityContext, NamespaceOption, PodSandboxConfig,
    PodSandboxMetadata,
};

pub fn pod_config(name: &str, hostname: &str) -> PodSandboxConfig {
    PodSandboxConfig {
        metadata: PodSandboxMetadata {
            name: name.to_string(),
            uid: "uid-1".to_string(),
            namespace: "default".to_string(),
            attempt: 0,
        },
        hostname: hostname.to_string(),
        log_directory: String::new(),
        dns_config: None,
        linux: None,
    }
}

pub fn pod_config_with_namespaces(
    name: &str,
    hostname: &str,
    options: NamespaceOption,
) -> PodSandboxConfig {
    let mut config = pod_config(name, hostname);
    config.linux = Some(LinuxPodSandboxConfig {
        security_context: Some(LinuxSandboxSecurityContext {
            privileged: false,
            namespace_options: Some(options),
        }),
    });
    config
}

pub fn container_request(
    pod_id: &str,
    name: &str,
    image: &str,
    mounts: Vec<Mount>,
) -> CreateContainerRequest {
    CreateContainerRequest {
        pod_sandbox_id: pod_id.to_string(),
        config: ContainerConfig {
            metadata: ContainerMetadata {
                name: name.to_string(),
                attempt: 0,
            },
            image: Some(ImageSpec {
                image: image.to_string(),
            }),
            mounts,
            ..Default::default()
        },
        sandbox_config: pod_config("p1", ""),
    }
}

pub fn with_security(
    mut request: CreateContainerRequest,
    security: LinuxContainerSecurityContext,
) -> CreateContainerRequest {
    request.config.linux = Some(LinuxContainerConfig {
        security_context: Some(security),
    });
    request
}
