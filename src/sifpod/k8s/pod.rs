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

/// Pod sandbox identity as supplied by the CRI caller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PodSandboxMetadata {
    pub name: String,
    pub uid: String,
    pub namespace: String,
    #[serde(default)]
    pub attempt: u32,
}

/// DNS settings materialized into the pod's `resolv.conf`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DnsConfig {
    #[serde(default)]
    pub servers: Vec<String>,
    #[serde(default)]
    pub searches: Vec<String>,
    #[serde(default)]
    pub options: Vec<String>,
}

/// Which namespace an instance lives in, per namespace type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NamespaceMode {
    #[default]
    Node,
    Pod,
    Container,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct NamespaceOption {
    #[serde(default)]
    pub network: NamespaceMode,
    #[serde(default)]
    pub pid: NamespaceMode,
    #[serde(default)]
    pub ipc: NamespaceMode,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LinuxSandboxSecurityContext {
    #[serde(default)]
    pub privileged: bool,
    #[serde(rename = "namespaceOptions", skip_serializing_if = "Option::is_none")]
    pub namespace_options: Option<NamespaceOption>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LinuxPodSandboxConfig {
    #[serde(rename = "securityContext", skip_serializing_if = "Option::is_none")]
    pub security_context: Option<LinuxSandboxSecurityContext>,
}

/// Pod sandbox configuration received from the CRI caller. Immutable after
/// the engine is initialized with it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PodSandboxConfig {
    #[serde(default)]
    pub metadata: PodSandboxMetadata,
    #[serde(default)]
    pub hostname: String,
    #[serde(rename = "logDirectory", default)]
    pub log_directory: String,
    #[serde(rename = "dnsConfig", skip_serializing_if = "Option::is_none")]
    pub dns_config: Option<DnsConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub linux: Option<LinuxPodSandboxConfig>,
}

impl PodSandboxConfig {
    pub fn security(&self) -> LinuxSandboxSecurityContext {
        self.linux
            .as_ref()
            .and_then(|linux| linux.security_context.clone())
            .unwrap_or_default()
    }

    pub fn namespace_options(&self) -> NamespaceOption {
        self.security().namespace_options.unwrap_or_default()
    }
}
