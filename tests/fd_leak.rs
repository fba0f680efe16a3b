//! Descriptor accounting across complete run/wait cycles.
//!
//! These checks compare /proc/self/fd against a baseline, so they live in
//! their own test binary where no unrelated test can open descriptors
//! concurrently. A single test function keeps the accounting serial.

use std::time::Duration;

use ptyspawn::{Capture, PtyProcess, RunConfig, Status};

fn open_fd_count() -> usize {
    // The count includes the fd used to read the directory itself, which
    // is the same for every call and so cancels out.
    std::fs::read_dir("/proc/self/fd").unwrap().count()
}

async fn run_and_wait(stdout: Capture, stderr: Capture) {
    let mut process = PtyProcess::new("/bin/sh");
    process.arg("-c").arg("exit 0");
    process
        .run(RunConfig {
            stdout,
            stderr,
            ..RunConfig::default()
        })
        .await
        .unwrap();
    assert_eq!(process.wait_until_exit().await.unwrap(), Status::Exited(0));
}

/// Reader tasks drop their descriptors shortly after end of file; give
/// the count a moment to settle back to the baseline.
async fn settled_count(baseline: usize) -> usize {
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    loop {
        let count = open_fd_count();
        if count == baseline || std::time::Instant::now() >= deadline {
            return count;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn no_descriptors_leak() {
    let combinations = [Capture::None, Capture::Null, Capture::Pipe, Capture::Pty];

    // One run up front settles all lazily-created process state: the
    // SIGCHLD router and its socket pair, the blocking thread pool.
    run_and_wait(Capture::Pty, Capture::Pty).await;
    tokio::time::sleep(Duration::from_millis(250)).await;
    let baseline = open_fd_count();

    // Every capture combination, a full run/wait cycle each.
    for stdout in combinations {
        for stderr in combinations {
            run_and_wait(stdout, stderr).await;
            assert_eq!(
                settled_count(baseline).await,
                baseline,
                "leak with stdout={stdout:?} stderr={stderr:?}"
            );
        }
    }

    // A failed run must clean up after itself just the same.
    let mut missing = PtyProcess::new("/surely/not/a/real/program");
    missing.run(RunConfig::default()).await.unwrap_err();
    drop(missing);
    assert_eq!(settled_count(baseline).await, baseline, "leak on failed run");
}
