use std::fs;
use std::os::unix::fs::symlink;
use std::path::PathBuf;

use nix::mount::MsFlags;
use tempfile::TempDir;

use sifpod::sifpod::engine::container::{ContainerEngine, MountStep};
use sifpod::sifpod::k8s::container::{Mount, MountPropagation};
use sifpod::sifpod::rpc::loopdev::LO_FLAGS_AUTOCLEAR;
use sifpod::sifpod::rpc::LoopInfo;
use sifpod::sifpod::test_support::scratch_layout;
use sifpod::sifpod::test_support::sif::{write_sif, SifPart};

use crate::support::container_request;

const SQUASHFS: i32 = 1;
const EXT3: i32 = 2;
const PARTITION: i32 = 0x4004;
const PRIM_SYS: i32 = 2;

fn mount(source: &str, target: PathBuf, fstype: &str, flags: MsFlags, data: &str) -> MountStep {
    MountStep::Mount {
        source: source.to_string(),
        target,
        fstype: fstype.to_string(),
        flags,
        data: data.to_string(),
    }
}

fn mkdir(path: PathBuf) -> MountStep {
    MountStep::Mkdir { path, mode: 0o755 }
}

#[test]
fn the_full_recipe_for_a_two_mount_container() {
    let dir = TempDir::new().unwrap();
    let layout = scratch_layout(&dir);

    let image = dir.path().join("web.sif");
    write_sif(
        &image,
        &[SifPart {
            datatype: PARTITION,
            fstype: SQUASHFS,
            parttype: PRIM_SYS,
            offset: 32768,
            length: 4194304,
        }],
    )
    .unwrap();

    let data_dir = dir.path().join("data");
    fs::create_dir(&data_dir).unwrap();
    let real_dir = dir.path().join("real");
    fs::create_dir(&real_dir).unwrap();
    let link = dir.path().join("link");
    symlink(&real_dir, &link).unwrap();
    let log_dir = dir.path().join("log/pods/p1");
    fs::create_dir_all(&log_dir).unwrap();

    let mut request = container_request(
        "p1_default_uid-1_0",
        "web",
        &image.to_string_lossy(),
        vec![
            Mount {
                host_path: data_dir.to_string_lossy().to_string(),
                container_path: "/data".to_string(),
                readonly: true,
                propagation: MountPropagation::Private,
            },
            Mount {
                host_path: link.to_string_lossy().to_string(),
                container_path: "/scratch".to_string(),
                readonly: false,
                propagation: MountPropagation::Bidirectional,
            },
        ],
    );
    request.config.log_path = "web_0.log".to_string();
    request.sandbox_config.log_directory = log_dir.to_string_lossy().to_string();

    let engine = ContainerEngine::new(request, None);
    let plan = engine.mount_plan(&layout).unwrap();

    let session = layout.session_dir("p1_default_uid-1_0_web_0");
    let lower = session.join("lower");
    let upper = session.join("upper");
    let work = session.join("work");
    let root = session.join("root");

    let expected = vec![
        mount(
            "",
            PathBuf::from("/"),
            "",
            MsFlags::MS_SLAVE | MsFlags::MS_REC,
            "",
        ),
        mkdir(session.clone()),
        mount("tmpfs", session.clone(), "tmpfs", MsFlags::MS_NOSUID, ""),
        MountStep::LoopImage {
            image: image.clone(),
            info: LoopInfo {
                offset: 32768,
                size_limit: 4194304,
                flags: LO_FLAGS_AUTOCLEAR,
            },
            target: lower.clone(),
            fstype: "squashfs".to_string(),
            flags: MsFlags::MS_NOSUID | MsFlags::MS_REC,
        },
        mkdir(upper.clone()),
        mkdir(work.clone()),
        mkdir(root.clone()),
        mkdir(upper.join("data")),
        mkdir(upper.join("scratch")),
        mount(
            "overlay",
            root.clone(),
            "overlay",
            MsFlags::MS_NOSUID | MsFlags::MS_REC,
            &format!(
                "lowerdir={},workdir={},upperdir={}",
                lower.display(),
                work.display(),
                upper.display()
            ),
        ),
        mkdir(root.join("data")),
        mount(
            &data_dir.to_string_lossy(),
            root.join("data"),
            "",
            MsFlags::MS_BIND | MsFlags::MS_REC,
            "",
        ),
        mount(
            "",
            root.join("data"),
            "",
            MsFlags::MS_REMOUNT | MsFlags::MS_BIND | MsFlags::MS_RDONLY,
            "",
        ),
        mount("", root.join("data"), "", MsFlags::MS_PRIVATE, ""),
        mkdir(root.join("scratch")),
        mount(
            &real_dir.to_string_lossy(),
            root.join("scratch"),
            "",
            MsFlags::MS_BIND | MsFlags::MS_REC,
            "",
        ),
        mount("", root.join("scratch"), "", MsFlags::MS_SHARED, ""),
        mount("proc", root.join("proc"), "proc", MsFlags::MS_NOSUID, ""),
        mount(
            "/dev",
            root.join("dev"),
            "udev",
            MsFlags::MS_NOSUID | MsFlags::MS_BIND,
            "",
        ),
        mount("sysfs", root.join("sys"), "sysfs", MsFlags::MS_NOSUID, ""),
        mount("tmpfs", root.join("tmp"), "tmpfs", MsFlags::MS_NOSUID, ""),
        mkdir(root.join("tmp/logs")),
        mount(
            &log_dir.to_string_lossy(),
            root.join("tmp/logs"),
            "",
            MsFlags::MS_NOSUID | MsFlags::MS_BIND,
            "",
        ),
        MountStep::Chroot { path: root },
    ];

    assert_eq!(plan, expected);
}

#[test]
fn non_squashfs_partitions_are_rejected_by_name() {
    let dir = TempDir::new().unwrap();
    let layout = scratch_layout(&dir);

    let image = dir.path().join("app.sif");
    write_sif(
        &image,
        &[SifPart {
            datatype: PARTITION,
            fstype: EXT3,
            parttype: PRIM_SYS,
            offset: 4096,
            length: 8192,
        }],
    )
    .unwrap();

    let request = container_request("p1_default_uid-1_0", "web", &image.to_string_lossy(), vec![]);
    let engine = ContainerEngine::new(request, None);
    let err = engine.mount_plan(&layout).unwrap_err();
    assert!(
        err.to_string().contains("unsupported image fs type: ext3"),
        "{}",
        err
    );
}

#[test]
fn the_recipe_mkdirs_execute_against_a_real_filesystem() {
    use sifpod::sifpod::engine::container::execute_plan;
    use sifpod::sifpod::rpc::{self, RpcClient};
    use std::os::unix::net::UnixStream;

    let dir = TempDir::new().unwrap();
    let layout = scratch_layout(&dir);

    let image = dir.path().join("web.sif");
    write_sif(
        &image,
        &[SifPart {
            datatype: PARTITION,
            fstype: SQUASHFS,
            parttype: PRIM_SYS,
            offset: 4096,
            length: 8192,
        }],
    )
    .unwrap();

    let nested = dir.path().join("nested");
    fs::create_dir(&nested).unwrap();
    let mut request = container_request(
        "p1_default_uid-1_0",
        "web",
        &image.to_string_lossy(),
        vec![Mount {
            host_path: nested.to_string_lossy().to_string(),
            container_path: "/var/data".to_string(),
            readonly: false,
            propagation: MountPropagation::Private,
        }],
    );
    request.config.log_path = "web_0.log".to_string();
    request.sandbox_config.log_directory = dir.path().to_string_lossy().to_string();

    let engine = ContainerEngine::new(request, None);
    let plan = engine.mount_plan(&layout).unwrap();

    // Only the directory steps run here; mounting needs privilege. The
    // log-dir mkdir hangs off the tmpfs a Mount step provides, so stand
    // that directory in by hand.
    let session = layout.session_dir("p1_default_uid-1_0_web_0");
    fs::create_dir_all(session.join("root/tmp")).unwrap();
    let mkdirs: Vec<MountStep> = plan
        .iter()
        .filter(|step| matches!(step, MountStep::Mkdir { .. }))
        .cloned()
        .collect();

    let (worker_end, client_end) = UnixStream::pair().unwrap();
    let worker = std::thread::spawn(move || {
        rpc::serve(worker_end).unwrap();
    });
    let mut client = RpcClient::new(client_end).unwrap();

    execute_plan(&mkdirs, &mut client).unwrap();
    assert!(session.join("upper/var/data").is_dir());
    assert!(session.join("root/var/data").is_dir());
    assert!(session.join("work").is_dir());
    assert!(session.join("root/tmp/logs").is_dir());

    drop(client);
    worker.join().unwrap();
}

#[test]
fn execute_replays_steps_in_order() {
    use sifpod::sifpod::engine::container::execute_plan;
    use sifpod::sifpod::rpc::{self, RpcClient};
    use std::os::unix::net::UnixStream;

    let dir = TempDir::new().unwrap();

    // Nested mkdirs only succeed when executed in plan order.
    let plan = vec![
        mkdir(dir.path().join("a")),
        mkdir(dir.path().join("a/b")),
        mkdir(dir.path().join("a/b/c")),
    ];

    let (worker_end, client_end) = UnixStream::pair().unwrap();
    let worker = std::thread::spawn(move || {
        rpc::serve(worker_end).unwrap();
    });
    let mut client = RpcClient::new(client_end).unwrap();

    execute_plan(&plan, &mut client).unwrap();
    assert!(dir.path().join("a/b/c").is_dir());

    drop(client);
    worker.join().unwrap();
}

#[test]
fn a_missing_bind_source_fails_the_plan() {
    let dir = TempDir::new().unwrap();
    let layout = scratch_layout(&dir);

    let image = dir.path().join("app.sif");
    write_sif(
        &image,
        &[SifPart {
            datatype: PARTITION,
            fstype: SQUASHFS,
            parttype: PRIM_SYS,
            offset: 4096,
            length: 8192,
        }],
    )
    .unwrap();

    let request = container_request(
        "p1_default_uid-1_0",
        "web",
        &image.to_string_lossy(),
        vec![Mount {
            host_path: dir.path().join("absent").to_string_lossy().to_string(),
            container_path: "/absent".to_string(),
            readonly: false,
            propagation: MountPropagation::Private,
        }],
    );
    let engine = ContainerEngine::new(request, None);
    let err = engine.mount_plan(&layout).unwrap_err();
    assert!(err.to_string().contains("invalid bind mount source"), "{}", err);
}
