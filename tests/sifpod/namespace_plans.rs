use std::path::PathBuf;

use tempfile::TempDir;

use sifpod::sifpod::engine::container::ContainerEngine;
use sifpod::sifpod::engine::pod::PodEngine;
use sifpod::sifpod::engine::{NamespaceKind, StarterConfig};
use sifpod::sifpod::instance;
use sifpod::sifpod::k8s::container::{ExecSyncRequest, LinuxContainerSecurityContext};
use sifpod::sifpod::k8s::pod::{NamespaceMode, NamespaceOption};
use sifpod::sifpod::test_support::scratch_layout;

use crate::support::{container_request, pod_config, pod_config_with_namespaces, with_security};

#[test]
fn pod_always_creates_a_mount_namespace() {
    let mut engine = PodEngine::new(pod_config("p1", ""));
    let mut conf = StarterConfig::default();
    engine.prepare_config(&mut conf).unwrap();

    assert!(conf.namespaces.creates(NamespaceKind::Mount));
    assert!(!conf.namespaces.creates(NamespaceKind::Uts));
    assert!(!conf.namespaces.creates(NamespaceKind::Net));
    assert!(conf.namespaces.join.is_empty());
    assert!(conf.no_new_privs, "unprivileged pods get no_new_privs");
}

#[test]
fn pod_hostname_adds_a_uts_namespace() {
    let mut engine = PodEngine::new(pod_config("p1", "p1-host"));
    let mut conf = StarterConfig::default();
    engine.prepare_config(&mut conf).unwrap();

    assert!(conf.namespaces.creates(NamespaceKind::Uts));
}

#[test]
fn pod_scoped_modes_create_their_namespaces() {
    let options = NamespaceOption {
        network: NamespaceMode::Pod,
        pid: NamespaceMode::Pod,
        ipc: NamespaceMode::Pod,
    };
    let mut engine = PodEngine::new(pod_config_with_namespaces("p1", "p1", options));
    let mut conf = StarterConfig::default();
    engine.prepare_config(&mut conf).unwrap();

    for kind in [
        NamespaceKind::Mount,
        NamespaceKind::Uts,
        NamespaceKind::Net,
        NamespaceKind::Pid,
        NamespaceKind::Ipc,
    ] {
        assert!(conf.namespaces.creates(kind), "missing {:?}", kind);
    }
}

#[test]
fn container_joins_the_pod_namespaces_by_path() {
    let dir = TempDir::new().unwrap();
    let layout = scratch_layout(&dir);

    let mut pod_record = instance::add(&layout, "p1_default_uid-1_0", false).unwrap();
    pod_record.pid = 4242;
    instance::update(&pod_record).unwrap();

    let mut request = container_request("p1_default_uid-1_0", "web", "/images/web.sif", vec![]);
    request.sandbox_config.hostname = "p1".to_string();
    let request = with_security(
        request,
        LinuxContainerSecurityContext {
            no_new_privs: true,
            namespace_options: Some(NamespaceOption {
                network: NamespaceMode::Pod,
                pid: NamespaceMode::Node,
                ipc: NamespaceMode::Pod,
            }),
        },
    );

    let mut engine = ContainerEngine::new(request, None);
    let mut conf = StarterConfig::default();
    engine.prepare_config(&layout, &mut conf).unwrap();

    assert!(conf.namespaces.creates(NamespaceKind::Mount));
    assert!(conf.namespaces.creates(NamespaceKind::Pid));
    assert!(conf.no_new_privs);
    assert_eq!(conf.mount_propagation.as_deref(), Some("shared"));

    let join_paths: Vec<(NamespaceKind, PathBuf)> = conf
        .namespaces
        .join
        .iter()
        .map(|ns| (ns.kind, ns.path.clone().unwrap()))
        .collect();
    assert_eq!(
        join_paths,
        vec![
            (NamespaceKind::Uts, PathBuf::from("/proc/4242/ns/uts")),
            (NamespaceKind::Ipc, PathBuf::from("/proc/4242/ns/ipc")),
            (NamespaceKind::Net, PathBuf::from("/proc/4242/ns/net")),
        ]
    );
}

#[test]
fn container_scoped_modes_create_instead_of_join() {
    let dir = TempDir::new().unwrap();
    let layout = scratch_layout(&dir);

    let mut pod_record = instance::add(&layout, "p1_default_uid-1_0", false).unwrap();
    pod_record.pid = 4242;
    instance::update(&pod_record).unwrap();

    let request = with_security(
        container_request("p1_default_uid-1_0", "web", "/images/web.sif", vec![]),
        LinuxContainerSecurityContext {
            no_new_privs: false,
            namespace_options: Some(NamespaceOption {
                network: NamespaceMode::Container,
                pid: NamespaceMode::Node,
                ipc: NamespaceMode::Container,
            }),
        },
    );

    let mut engine = ContainerEngine::new(request, None);
    let mut conf = StarterConfig::default();
    engine.prepare_config(&layout, &mut conf).unwrap();

    assert!(conf.namespaces.creates(NamespaceKind::Net));
    assert!(conf.namespaces.creates(NamespaceKind::Ipc));
    assert!(conf.namespaces.join.is_empty());
}

#[test]
fn missing_pod_instance_fails_prepare() {
    let dir = TempDir::new().unwrap();
    let layout = scratch_layout(&dir);

    let request = container_request("absent-pod", "web", "/images/web.sif", vec![]);
    let mut engine = ContainerEngine::new(request, None);
    let mut conf = StarterConfig::default();
    let err = engine.prepare_config(&layout, &mut conf).unwrap_err();
    assert!(err.to_string().contains("absent-pod"), "{}", err);
}

#[test]
fn exec_sync_joins_every_container_namespace() {
    let dir = TempDir::new().unwrap();
    let layout = scratch_layout(&dir);

    let request = container_request("p1_default_uid-1_0", "web", "/images/web.sif", vec![]);
    let config = serde_json::to_value(&request).unwrap();
    let mut record = instance::add(&layout, "p1_default_uid-1_0_web_0", false).unwrap();
    record.pid = 5353;
    record.config = config;
    instance::update(&record).unwrap();

    let mut engine = ContainerEngine::exec_sync(ExecSyncRequest {
        container_id: "p1_default_uid-1_0_web_0".to_string(),
        cmd: vec!["/bin/date".to_string()],
        timeout: 0,
    });
    let mut conf = StarterConfig::default();
    engine.prepare_config(&layout, &mut conf).unwrap();

    assert!(conf.namespaces.create.is_empty());
    let kinds: Vec<NamespaceKind> = conf.namespaces.join.iter().map(|ns| ns.kind).collect();
    assert_eq!(
        kinds,
        vec![
            NamespaceKind::Mount,
            NamespaceKind::Pid,
            NamespaceKind::Uts,
            NamespaceKind::Ipc,
            NamespaceKind::Net,
        ]
    );
    for ns in &conf.namespaces.join {
        let path = ns.path.as_ref().unwrap();
        assert!(path.starts_with("/proc/5353/ns"), "{:?}", path);
    }
}
