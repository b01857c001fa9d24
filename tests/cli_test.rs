//! End-to-end tests of the mapipe binary

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener};
use std::process::{Command, Output, Stdio};
use std::thread;

fn mapipe() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_mapipe"));
    cmd.env_remove("MAPIPE_TRACE_DIR")
        .env_remove("MAPIPE_BANDWIDTH")
        .env_remove("RUST_LOG");
    cmd
}

fn run(args: &[&str]) -> Output {
    mapipe()
        .args(args)
        .stdin(Stdio::null())
        .output()
        .expect("failed to run mapipe")
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

/// A loopback port with nothing listening on it
fn refused_addr() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    format!("/ip4/127.0.0.1/tcp/{}", port)
}

/// Echo server for a single connection, running on its own thread
fn start_echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut buf = [0u8; 1024];
        loop {
            match stream.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if stream.write_all(&buf[..n]).is_err() {
                        break;
                    }
                }
            }
        }
    });
    addr
}

#[test]
fn test_version_flag() {
    for flag in ["-v", "--version"] {
        let output = run(&[flag]);
        assert!(output.status.success());
        let stdout = String::from_utf8_lossy(&output.stdout);
        assert!(stdout.starts_with("mapipe "), "stdout: {}", stdout);
    }
}

#[test]
fn test_wrong_address_count_exits_with_error() {
    let output = run(&["listen", "/ip4/127.0.0.1/tcp/0"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("error: listen mode takes exactly 2 addresses"));
}

#[test]
fn test_unknown_mode_exits_with_error() {
    let output = run(&["exit", "/ip4/127.0.0.1/tcp/0"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("error: invalid mode exit"));
}

#[test]
fn test_bandwidth_without_rate_suffix_is_rejected() {
    let output = run(&["--bandwidth", "10MB", "dial", "/unix/stdio", "/unix/stdio"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("invalid bandwidth"));
}

#[test]
fn test_unparseable_address_is_rejected() {
    let output = run(&["dial", "127.0.0.1:80", "/unix/stdio"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("127.0.0.1:80"));
}

#[test]
fn test_trace_files_record_control_lines() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("traces");
    let refused = refused_addr();

    let output = run(&[
        "--trace",
        dir.to_str().unwrap(),
        "dial",
        refused.as_str(),
        refused.as_str(),
    ]);
    assert_eq!(output.status.code(), Some(1));

    let mut entries: Vec<_> = std::fs::read_dir(&dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect();
    entries.sort();
    assert_eq!(entries.len(), 3);

    let ctl = entries
        .iter()
        .find(|path| path.to_string_lossy().ends_with("-ctl"))
        .unwrap();
    let log = std::fs::read_to_string(ctl).unwrap();
    assert!(log.starts_with(&format!("dialing {}\n", refused)), "ctl: {}", log);
    assert!(log.contains("error: "));

    // control lines also reach stderr
    assert!(stderr(&output).contains(&format!("dialing {}", refused)));
}

#[test]
fn test_forward_stdio_to_tcp() {
    let echo = start_echo_server();
    let target = format!("/ip4/127.0.0.1/tcp/{}", echo.port());
    let mut child = mapipe()
        .args(["fwd", "/unix/stdio", target.as_str()])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("failed to spawn mapipe");

    let mut stdin = child.stdin.take().unwrap();
    stdin.write_all(b"hello\n").unwrap();
    stdin.flush().unwrap();

    let mut echoed = [0u8; 6];
    child
        .stdout
        .as_mut()
        .unwrap()
        .read_exact(&mut echoed)
        .unwrap();
    assert_eq!(&echoed, b"hello\n");

    // closing stdin ends the session
    drop(stdin);
    let output = child.wait_with_output().unwrap();
    assert!(output.status.success(), "stderr: {}", stderr(&output));

    let log = stderr(&output);
    assert!(log.contains("listening on /unix/stdio"));
    assert!(log.contains("accepted /unix/stdio /unix/stdio"));
    assert!(log.contains("piping /unix/stdio <--> "));
}
