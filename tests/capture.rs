//! Output capture, terminal options and working-directory scenarios.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::timeout;

use ptyspawn::{ByteStream, Capture, PtyOptions, PtyProcess, RunConfig, Status, TermSize};

fn sh(script: &str) -> PtyProcess {
    let mut process = PtyProcess::new("/bin/sh");
    process.arg("-c").arg(script);
    process
}

async fn read_exact(stream: &mut ByteStream, len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(len);
    while out.len() < len {
        match timeout(Duration::from_secs(5), stream.next()).await {
            Ok(Some(Ok(byte))) => out.push(byte),
            Ok(Some(Err(err))) => panic!("read failed after {out:?}: {err}"),
            Ok(None) => panic!("stream ended early after {out:?}"),
            Err(_) => panic!("read timed out after {out:?}"),
        }
    }
    out
}

async fn read_to_end(stream: &mut ByteStream) -> Vec<u8> {
    let mut out = Vec::new();
    loop {
        match timeout(Duration::from_secs(5), stream.next()).await {
            Ok(Some(Ok(byte))) => out.push(byte),
            Ok(Some(Err(err))) => panic!("read failed after {out:?}: {err}"),
            Ok(None) => return out,
            Err(_) => panic!("read timed out after {out:?}"),
        }
    }
}

/// Nothing should arrive on `stream` for a little while.
async fn assert_quiet(stream: &mut ByteStream) {
    if let Ok(byte) = timeout(Duration::from_millis(100), stream.next()).await {
        panic!("expected no bytes yet, got {byte:?}");
    }
}

#[tokio::test]
async fn pipe_captures_a_line() {
    let mut process = sh(r#"echo "Hello World""#);
    process
        .run(RunConfig {
            stdout: Capture::Pipe,
            stderr: Capture::None,
            ..RunConfig::default()
        })
        .await
        .unwrap();

    let mut stdout = process.stdout_bytes();
    assert_eq!(read_exact(&mut stdout, 12).await, b"Hello World\n");
    // Then end of file.
    assert!(timeout(Duration::from_secs(5), stdout.next())
        .await
        .unwrap()
        .is_none());

    assert_eq!(process.wait_until_exit().await.unwrap(), Status::Exited(0));
}

#[tokio::test]
async fn explicit_environment_is_exact() {
    let mut process = PtyProcess::new("/usr/bin/env");
    process
        .env("VORLON", "Who are you")
        .env("SHADOW", "What do you want");
    process
        .run(RunConfig {
            stdout: Capture::Pipe,
            stderr: Capture::None,
            ..RunConfig::default()
        })
        .await
        .unwrap();

    let mut stdout = process.stdout_bytes();
    let output = read_to_end(&mut stdout).await;
    let output = String::from_utf8(output).unwrap();

    let parsed: HashMap<&str, &str> = output
        .lines()
        .map(|line| line.split_once('=').unwrap())
        .collect();
    let expected = HashMap::from([
        ("VORLON", "Who are you"),
        ("SHADOW", "What do you want"),
    ]);
    assert_eq!(parsed, expected);

    assert_eq!(process.wait_until_exit().await.unwrap(), Status::Exited(0));
}

#[tokio::test]
async fn null_capture_observes_nothing() {
    let mut process = sh("echo lost >&2");
    process
        .run(RunConfig {
            stdout: Capture::None,
            stderr: Capture::Null,
            ..RunConfig::default()
        })
        .await
        .unwrap();

    // The parent-side stderr handle reads /dev/null: immediate end of file.
    let mut stderr = process.stderr_bytes();
    assert!(timeout(Duration::from_secs(5), stderr.next())
        .await
        .unwrap()
        .is_none());

    assert_eq!(process.wait_until_exit().await.unwrap(), Status::Exited(0));
}

#[tokio::test]
async fn both_streams_on_the_pty_interleave_as_written() {
    let mut process = sh("echo one; echo two >&2");
    process.run(RunConfig::default()).await.unwrap();

    let mut output = process.pty_bytes();
    assert_eq!(read_exact(&mut output, 8).await, b"one\ntwo\n");

    assert_eq!(process.wait_until_exit().await.unwrap(), Status::Exited(0));
}

#[tokio::test]
async fn canonical_mode_holds_the_unfinished_line() {
    let mut process = PtyProcess::new("/bin/cat");
    process
        .run(RunConfig {
            pty_options: PtyOptions {
                disable_echo: true,
                ..PtyOptions::default()
            },
            ..RunConfig::default()
        })
        .await
        .unwrap();

    let mut output = process.pty_bytes();

    // Only the two complete lines come back; "baz" sits in the line buffer.
    process.write_pty(b"foo\nbar\nbaz").unwrap();
    assert_eq!(read_exact(&mut output, 8).await, b"foo\nbar\n");
    assert_quiet(&mut output).await;

    // The newline releases it.
    process.write_pty(b"\n").unwrap();
    assert_eq!(read_exact(&mut output, 4).await, b"baz\n");

    process.terminate().await.unwrap();
    process.wait_until_exit().await.unwrap();
}

#[tokio::test]
async fn non_canonical_mode_passes_bytes_through() {
    let mut process = PtyProcess::new("/bin/cat");
    process
        .run(RunConfig {
            pty_options: PtyOptions {
                disable_echo: true,
                non_canonical: true,
                ..PtyOptions::default()
            },
            ..RunConfig::default()
        })
        .await
        .unwrap();

    let mut output = process.pty_bytes();

    process.write_pty(b"foo\nbar\nbaz").unwrap();
    assert_eq!(read_exact(&mut output, 11).await, b"foo\nbar\nbaz");

    process.write_pty(b"\n").unwrap();
    assert_eq!(read_exact(&mut output, 1).await, b"\n");

    process.terminate().await.unwrap();
    process.wait_until_exit().await.unwrap();
}

#[tokio::test]
async fn output_crlf_translates_newlines() {
    let mut process = sh("echo one");
    process
        .run(RunConfig {
            pty_options: PtyOptions {
                output_crlf: true,
                ..PtyOptions::default()
            },
            ..RunConfig::default()
        })
        .await
        .unwrap();

    let mut output = process.pty_bytes();
    assert_eq!(read_exact(&mut output, 5).await, b"one\r\n");

    assert_eq!(process.wait_until_exit().await.unwrap(), Status::Exited(0));
}

#[tokio::test]
async fn pty_options_round_trip_through_the_facade() {
    let mut process = PtyProcess::new("/bin/cat");
    let initial = PtyOptions {
        disable_echo: true,
        non_canonical: false,
        output_crlf: true,
    };
    process
        .run(RunConfig {
            pty_options: initial,
            ..RunConfig::default()
        })
        .await
        .unwrap();

    assert_eq!(process.pty_options().unwrap(), initial);

    let changed = PtyOptions {
        disable_echo: false,
        non_canonical: true,
        output_crlf: false,
    };
    process.set_pty_options(changed, true, false).unwrap();
    assert_eq!(process.pty_options().unwrap(), changed);

    process.terminate().await.unwrap();
    process.wait_until_exit().await.unwrap();
}

#[tokio::test]
async fn window_size_is_adjustable() {
    let mut process = PtyProcess::new("/bin/cat");
    process.run(RunConfig::default()).await.unwrap();

    let size = TermSize { rows: 50, cols: 132 };
    process.set_term_size(size).unwrap();
    assert_eq!(process.term_size().unwrap(), size);

    process.terminate().await.unwrap();
    process.wait_until_exit().await.unwrap();
}

#[tokio::test]
async fn working_directory_is_honored() {
    let mut process = sh("pwd");
    process.current_dir("/tmp");
    process
        .run(RunConfig {
            stdout: Capture::Pipe,
            stderr: Capture::None,
            ..RunConfig::default()
        })
        .await
        .unwrap();

    let mut stdout = process.stdout_bytes();
    assert_eq!(read_to_end(&mut stdout).await, b"/tmp\n");
    assert_eq!(process.wait_until_exit().await.unwrap(), Status::Exited(0));
}

#[tokio::test]
async fn empty_working_directory_means_inherit() {
    let run_pwd = |dir: Option<&'static str>| async move {
        let mut process = sh("pwd");
        if let Some(dir) = dir {
            process.current_dir(dir);
        }
        process
            .run(RunConfig {
                stdout: Capture::Pipe,
                stderr: Capture::None,
                ..RunConfig::default()
            })
            .await
            .unwrap();
        let mut stdout = process.stdout_bytes();
        let output = read_to_end(&mut stdout).await;
        assert_eq!(process.wait_until_exit().await.unwrap(), Status::Exited(0));
        output
    };

    // `chdir("")` would fail with ENOENT; the empty string must instead
    // behave exactly like not asking for a directory change.
    let inherited = run_pwd(None).await;
    let empty = run_pwd(Some("")).await;
    assert_eq!(inherited, empty);
}

#[tokio::test]
#[should_panic(expected = "stdout capture was not requested")]
async fn uncaptured_stdout_is_a_programmer_error() {
    let mut process = sh("exit 0");
    process
        .run(RunConfig {
            stdout: Capture::None,
            stderr: Capture::None,
            ..RunConfig::default()
        })
        .await
        .unwrap();
    process.wait_until_exit().await.unwrap();

    process.stdout_bytes();
}
