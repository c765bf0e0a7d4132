use std::os::unix::net::UnixStream;
use std::thread;

use nix::errno::Errno;
use nix::mount::MsFlags;
use tempfile::TempDir;

use sifpod::sifpod::rpc::{self, RpcClient};
use sifpod::sifpod::util::errno_of;

fn start_worker() -> (RpcClient, thread::JoinHandle<()>) {
    let (worker_end, client_end) = UnixStream::pair().unwrap();
    let handle = thread::spawn(move || {
        rpc::serve(worker_end).expect("worker loop");
    });
    (RpcClient::new(client_end).unwrap(), handle)
}

#[test]
fn mkdir_reports_whether_it_created() {
    let dir = TempDir::new().unwrap();
    let (mut client, worker) = start_worker();

    let path = dir.path().join("stage");
    assert!(client.mkdir(&path, 0o755).unwrap());
    assert!(path.is_dir());

    // Second call finds it in place; tolerated, not an error.
    assert!(!client.mkdir(&path, 0o755).unwrap());

    drop(client);
    worker.join().unwrap();
}

#[test]
fn kernel_errno_survives_the_round_trip() {
    let dir = TempDir::new().unwrap();
    let (mut client, worker) = start_worker();

    let path = dir.path().join("no/such/parent");
    let err = client.mkdir(&path, 0o755).unwrap_err();
    assert_eq!(errno_of(&err), Some(Errno::ENOENT), "error chain: {}", err);

    drop(client);
    worker.join().unwrap();
}

#[test]
fn mount_failures_carry_the_kernel_error() {
    let dir = TempDir::new().unwrap();
    let (mut client, worker) = start_worker();

    let target = dir.path().join("mnt");
    client.mkdir(&target, 0o755).unwrap();

    // An fstype the kernel does not know fails for root and non-root
    // alike; only the errno differs.
    let err = client
        .mount("none", &target, "sifpod-no-such-fs", MsFlags::MS_NOSUID, "")
        .unwrap_err();
    assert!(err.to_string().contains("failed"), "{}", err);
    assert!(
        errno_of(&err).is_some(),
        "expected an errno in the chain: {}",
        err
    );

    drop(client);
    worker.join().unwrap();
}

#[test]
fn ll_swallows_failures() {
    let (mut client, worker) = start_worker();

    // Listing a missing path must not error the connection.
    client.ll("/definitely/not/here");

    // The connection still works afterwards.
    let dir = TempDir::new().unwrap();
    assert!(client.mkdir(&dir.path().join("after"), 0o755).unwrap());

    drop(client);
    worker.join().unwrap();
}

#[test]
fn the_worker_exits_when_the_peer_closes() {
    let (client, worker) = start_worker();
    drop(client);
    worker.join().expect("worker exits cleanly on EOF");
}
