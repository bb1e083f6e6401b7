//! End-to-end tests against `matchlock-fake-manager`, grounded on
//! `mcp-server/tests/common/mcp_process.rs`'s pattern of using
//! `assert_cmd::cargo_bin` to locate and spawn a real compiled peer rather
//! than mocking the transport in-process.
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::process::Command as StdCommand;
use std::time::Duration;

use assert_cmd::prelude::*;
use matchlock_client::Client;
use matchlock_client::Config;
use matchlock_client::CreateOptions;

fn fake_manager_config() -> Config {
    let std_cmd = StdCommand::cargo_bin("matchlock-fake-manager")
        .expect("matchlock-fake-manager binary should be built by cargo test");
    let binary_path = std_cmd.get_program().to_string_lossy().into_owned();
    Config {
        binary_path,
        use_sudo: false,
    }
}

async fn started_client() -> Client {
    let client = Client::new(fake_manager_config());
    client.start().await.expect("client should start the fake manager");
    client
}

#[tokio::test]
async fn create_then_exec_returns_decoded_output() {
    let client = started_client().await;
    let vm_id = client
        .create(CreateOptions::new("alpine:latest"))
        .await
        .expect("create should succeed");
    assert_eq!(vm_id, "vm-1");

    let result = client
        .exec("echo hello", None, None)
        .await
        .expect("exec should succeed");
    assert_eq!(result.exit_code, 0);
    assert_eq!(result.stdout, "hello\n");

    client.close(5).await;
}

#[tokio::test]
async fn exec_stream_delivers_chunks_to_writer_before_completing() {
    let client = started_client().await;
    client
        .create(CreateOptions::new("alpine:latest"))
        .await
        .expect("create should succeed");

    let captured = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
    let writer_captured = captured.clone();

    struct VecSink(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);
    impl std::io::Write for VecSink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap_or_else(|e| e.into_inner()).extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    let result = client
        .exec_stream(
            "doesn't matter, fake-manager ignores the command",
            None,
            None,
            Some(Box::new(VecSink(writer_captured))),
            None,
        )
        .await
        .expect("exec_stream should succeed");

    assert_eq!(result.exit_code, 0);
    let seen = captured.lock().unwrap_or_else(|e| e.into_inner()).clone();
    assert_eq!(seen, b"A\nB\n");

    client.close(5).await;
}

#[tokio::test]
async fn exec_with_timeout_on_a_non_responding_call_times_out_and_cancels() {
    let client = started_client().await;
    client
        .create(CreateOptions::new("alpine:latest"))
        .await
        .expect("create should succeed");

    let result = client.exec("sleep 100", None, Some(Duration::from_millis(100))).await;
    assert!(result.is_err(), "a call the peer never answers must time out");

    client.close(5).await;
}

#[tokio::test]
async fn concurrent_calls_on_the_same_client_do_not_cross_talk() {
    let client = started_client().await;
    client
        .create(CreateOptions::new("alpine:latest"))
        .await
        .expect("create should succeed");

    let a = client.clone();
    let b = client.clone();
    let (ra, rb) = tokio::join!(
        async move { a.exec("echo one", None, None).await },
        async move { b.exec("echo two", None, None).await },
    );

    assert_eq!(ra.expect("first concurrent exec should succeed").stdout, "one\n");
    assert_eq!(rb.expect("second concurrent exec should succeed").stdout, "two\n");

    client.close(5).await;
}

#[tokio::test]
async fn write_file_then_read_file_round_trips_through_the_fake_manager() {
    let client = started_client().await;
    client
        .create(CreateOptions::new("alpine:latest"))
        .await
        .expect("create should succeed");

    client
        .write_file("/tmp/greeting.txt", b"hi there", 0o644, None)
        .await
        .expect("write_file should succeed");

    let content = client
        .read_file("/tmp/greeting.txt", None)
        .await
        .expect("read_file should succeed");
    assert_eq!(content, b"hi there");

    client.close(5).await;
}

#[tokio::test]
async fn close_is_idempotent() {
    let client = started_client().await;
    client
        .create(CreateOptions::new("alpine:latest"))
        .await
        .expect("create should succeed");

    client.close(5).await;
    // A second close must not hang or panic; it is a no-op past the first.
    client.close(5).await;
}

#[tokio::test]
async fn create_rejects_conflicting_no_network_options_before_any_rpc_is_sent() {
    let client = started_client().await;

    let mut opts = CreateOptions::new("alpine:latest");
    opts.no_network = true;
    opts.allowed_hosts.push("example.com".to_string());

    let err = client.create(opts).await.expect_err("invariant violation must be rejected locally");
    assert!(matches!(err, matchlock_client::ClientError::Config(_)));

    client.close(5).await;
}
