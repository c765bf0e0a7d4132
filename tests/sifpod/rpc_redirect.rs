use std::fs;
use std::os::unix::net::UnixStream;
use std::thread;

use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{fork, ForkResult};
use tempfile::TempDir;

use sifpod::sifpod::rpc::{self, RpcClient};

// RedirectIo rewires the worker-side process's stdio, so it has to run
// in a forked child to leave the test harness's streams alone.
#[test]
fn redirect_io_sends_stdout_and_stderr_to_the_file() {
    let dir = TempDir::new().unwrap();
    let log_path = dir.path().join("redirected.log");

    match unsafe { fork() }.unwrap() {
        ForkResult::Child => {
            let (worker_end, client_end) = UnixStream::pair().unwrap();
            let worker = thread::spawn(move || {
                let _ = rpc::serve(worker_end);
            });

            let mut client = RpcClient::new(client_end).unwrap();
            if client.redirect_io(&log_path).is_err() {
                unsafe { libc::_exit(1) };
            }

            // File descriptors are process-wide; the worker thread's
            // dup2 redirects this thread's stdio too. _exit skips the
            // stdout buffer, so flush by hand.
            // print!/eprintln! honor the test harness's output-capture
            // override, which survives the fork; write via the raw
            // Stdout/Stderr handles instead so the bytes actually hit
            // the redirected file descriptors.
            use std::io::Write;
            let mut stdout = std::io::stdout();
            writeln!(stdout, "redirected stdout probe").unwrap();
            stdout.flush().unwrap();
            let mut stderr = std::io::stderr();
            writeln!(stderr, "redirected stderr probe").unwrap();
            stderr.flush().unwrap();

            drop(client);
            worker.join().unwrap();
            unsafe { libc::_exit(0) };
        }
        ForkResult::Parent { child } => {
            let status = waitpid(child, None).unwrap();
            assert!(
                matches!(status, WaitStatus::Exited(_, 0)),
                "child failed: {:?}",
                status
            );
        }
    }

    let contents = fs::read_to_string(&log_path).unwrap();
    assert!(
        contents.contains("redirected stdout probe"),
        "stdout not redirected: {:?}",
        contents
    );
    assert!(
        contents.contains("redirected stderr probe"),
        "stderr not redirected: {:?}",
        contents
    );
}
