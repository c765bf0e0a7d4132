/*
 * Copyright (C) 2026 The Sifpod Authors
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 * http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

use serde::{Deserialize, Serialize};

use crate::sifpod::k8s::pod::{NamespaceOption, PodSandboxConfig};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContainerMetadata {
    pub name: String,
    #[serde(default)]
    pub attempt: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImageSpec {
    #[serde(default)]
    pub image: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    #[serde(default)]
    pub value: String,
}

/// Bind mount propagation requested by the CRI caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MountPropagation {
    #[default]
    #[serde(rename = "PROPAGATION_PRIVATE")]
    Private,
    #[serde(rename = "PROPAGATION_HOST_TO_CONTAINER")]
    HostToContainer,
    #[serde(rename = "PROPAGATION_BIDIRECTIONAL")]
    Bidirectional,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Mount {
    #[serde(rename = "hostPath", default)]
    pub host_path: String,
    #[serde(rename = "containerPath", default)]
    pub container_path: String,
    #[serde(default)]
    pub readonly: bool,
    #[serde(default)]
    pub propagation: MountPropagation,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LinuxContainerSecurityContext {
    #[serde(rename = "noNewPrivs", default)]
    pub no_new_privs: bool,
    #[serde(rename = "namespaceOptions", skip_serializing_if = "Option::is_none")]
    pub namespace_options: Option<NamespaceOption>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LinuxContainerConfig {
    #[serde(rename = "securityContext", skip_serializing_if = "Option::is_none")]
    pub security_context: Option<LinuxContainerSecurityContext>,
}

/// Container configuration received from the CRI caller. Immutable after
/// the engine is initialized with it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContainerConfig {
    #[serde(default)]
    pub metadata: ContainerMetadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageSpec>,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(rename = "workingDir", default)]
    pub working_dir: String,
    #[serde(default)]
    pub envs: Vec<KeyValue>,
    #[serde(default)]
    pub mounts: Vec<Mount>,
    #[serde(rename = "logPath", default)]
    pub log_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub linux: Option<LinuxContainerConfig>,
}

impl ContainerConfig {
    pub fn security(&self) -> LinuxContainerSecurityContext {
        self.linux
            .as_ref()
            .and_then(|linux| linux.security_context.clone())
            .unwrap_or_default()
    }

    pub fn namespace_options(&self) -> NamespaceOption {
        self.security().namespace_options.unwrap_or_default()
    }

    pub fn image_path(&self) -> &str {
        self.image.as_ref().map(|spec| spec.image.as_str()).unwrap_or("")
    }
}

/// The CRI CreateContainer payload the container engine is initialized
/// with. The sandbox configuration rides along because the engine needs
/// the pod's hostname, log directory, and namespace elections.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateContainerRequest {
    #[serde(rename = "podSandboxId", default)]
    pub pod_sandbox_id: String,
    #[serde(default)]
    pub config: ContainerConfig,
    #[serde(rename = "sandboxConfig", default)]
    pub sandbox_config: PodSandboxConfig,
}

/// Synchronous exec into a running container.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecSyncRequest {
    #[serde(rename = "containerId", default)]
    pub container_id: String,
    #[serde(default)]
    pub cmd: Vec<String>,
    #[serde(default)]
    pub timeout: i64,
}
