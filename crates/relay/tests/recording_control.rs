//! Recording orchestrator tests: the HTTP control surface driving a fake
//! extension over the real uplink transport.

mod support;

use std::net::SocketAddr;
use std::time::Duration;

use serde_json::{Value, json};

use support::*;
use tabrelay::RelayConfig;
use tabrelay_protocol::RecordingChunk;

fn http() -> reqwest::Client {
	reqwest::Client::new()
}

async fn post(addr: SocketAddr, op: &str, body: Value) -> Value {
	http()
		.post(format!("http://{addr}/recording/{op}"))
		.json(&body)
		.send()
		.await
		.expect("http request")
		.json()
		.await
		.expect("json body")
}

async fn status(addr: SocketAddr) -> Value {
	http()
		.get(format!("http://{addr}/recording/status"))
		.send()
		.await
		.expect("http request")
		.json()
		.await
		.expect("json body")
}

async fn wait_for_idle(addr: SocketAddr) {
	for _ in 0..50 {
		if status(addr).await["state"] == "idle" {
			return;
		}
		tokio::time::sleep(Duration::from_millis(50)).await;
	}
	panic!("recording never returned to idle");
}

/// Drives a start through the relay while playing the extension side.
async fn start_recording(addr: SocketAddr, ext: &mut Ws, output: &std::path::Path) -> Value {
	let start = post(
		addr,
		"start",
		json!({"outputPath": output, "frameRate": 30, "audio": false}),
	);
	let extension = async {
		let cmd = recv_relay(ext).await;
		assert_eq!(cmd["method"], "startRecording");
		assert_eq!(cmd["params"]["frameRate"], 30);
		send_json(ext, json!({"id": cmd["id"], "result": {"tabId": 42}})).await;
	};
	let (response, ()) = tokio::join!(start, extension);
	response
}

fn chunk_frame(tab_id: i64, bytes: &[u8], is_final: bool) -> Value {
	json!({
		"method": "recordingData",
		"params": RecordingChunk::from_bytes(tab_id, bytes, is_final),
	})
}

#[tokio::test]
async fn full_recording_lifecycle_writes_the_relay_computed_file() {
	let addr = spawn_relay(RelayConfig::default()).await;
	let mut ext = connect_extension(addr).await;
	let tmp = tempfile::tempdir().unwrap();
	let output = tmp.path().join("capture.webm");

	let started = start_recording(addr, &mut ext, &output).await;
	assert_eq!(started["success"], true);
	assert_eq!(started["tabId"], 42);

	// A second start must fail fast without disturbing the first session.
	let second = post(addr, "start", json!({"outputPath": tmp.path().join("x.webm")})).await;
	assert_eq!(second["success"], false);
	assert!(
		second["error"].as_str().unwrap().contains("already in progress"),
		"got: {second}"
	);

	let active = status(addr).await;
	assert_eq!(active["state"], "active");
	assert_eq!(active["tabId"], 42);

	let stop = post(addr, "stop", json!({}));
	let extension = async {
		let cmd = recv_relay(&mut ext).await;
		assert_eq!(cmd["method"], "stopRecording");
		send_json(&mut ext, json!({"id": cmd["id"], "result": {"tabId": 42, "duration": 1234}}))
			.await;
		send_json(&mut ext, chunk_frame(42, b"hello ", false)).await;
		send_json(&mut ext, chunk_frame(42, b"world", true)).await;
	};
	let (stopped, ()) = tokio::join!(stop, extension);

	assert_eq!(stopped["success"], true, "got: {stopped}");
	assert_eq!(stopped["path"], output.to_str().unwrap());
	assert_eq!(stopped["size"], 11);
	assert!(stopped["duration"].is_u64());

	let written = std::fs::read(&output).unwrap();
	assert_eq!(written, b"hello world");
	assert_eq!(written.len() as u64, stopped["size"].as_u64().unwrap());

	assert_eq!(status(addr).await["state"], "idle");
}

#[tokio::test]
async fn cancel_discards_data_and_writes_no_file() {
	let addr = spawn_relay(RelayConfig::default()).await;
	let mut ext = connect_extension(addr).await;
	let tmp = tempfile::tempdir().unwrap();
	let output = tmp.path().join("capture.webm");

	let started = start_recording(addr, &mut ext, &output).await;
	assert_eq!(started["success"], true);

	send_json(&mut ext, chunk_frame(42, b"partial data", false)).await;

	let cancel = post(addr, "cancel", json!({}));
	let extension = async {
		let cmd = recv_relay(&mut ext).await;
		assert_eq!(cmd["method"], "cancelRecording");
		send_json(&mut ext, json!({"id": cmd["id"], "result": {}})).await;
	};
	let (cancelled, ()) = tokio::join!(cancel, extension);
	assert_eq!(cancelled["success"], true);

	assert_eq!(status(addr).await["state"], "idle");
	assert!(!output.exists(), "cancel must not produce an output file");
}

#[tokio::test]
async fn extension_initiated_cancel_takes_the_same_discard_path() {
	let addr = spawn_relay(RelayConfig::default()).await;
	let mut ext = connect_extension(addr).await;
	let tmp = tempfile::tempdir().unwrap();
	let output = tmp.path().join("capture.webm");

	let started = start_recording(addr, &mut ext, &output).await;
	assert_eq!(started["success"], true);

	send_json(&mut ext, chunk_frame(42, b"doomed", false)).await;
	send_json(&mut ext, json!({"method": "recordingCancelled", "params": {"tabId": 42}})).await;

	wait_for_idle(addr).await;
	assert!(!output.exists());
}

#[tokio::test]
async fn killing_the_uplink_mid_recording_resets_to_idle_without_a_file() {
	let addr = spawn_relay(RelayConfig::default()).await;
	let mut ext = connect_extension(addr).await;
	let tmp = tempfile::tempdir().unwrap();
	let output = tmp.path().join("capture.webm");

	let started = start_recording(addr, &mut ext, &output).await;
	assert_eq!(started["success"], true);
	send_json(&mut ext, chunk_frame(42, b"lost", false)).await;

	drop(ext);
	wait_for_idle(addr).await;
	assert!(!output.exists(), "uplink loss must not produce an output file");

	let restart = post(addr, "start", json!({"outputPath": output})).await;
	assert_eq!(restart["success"], false);
	assert_eq!(restart["error"], "extension not connected");
}

#[tokio::test]
async fn stop_without_active_recording_fails_in_the_envelope() {
	let addr = spawn_relay(RelayConfig::default()).await;
	let _ext = connect_extension(addr).await;

	let stopped = post(addr, "stop", json!({})).await;
	assert_eq!(stopped["success"], false);
	assert!(stopped["error"].as_str().unwrap().contains("no active recording"));

	let cancelled = post(addr, "cancel", json!({})).await;
	assert_eq!(cancelled["success"], false);
}

#[tokio::test]
async fn start_surfaces_the_uplink_error_and_stays_idle() {
	let addr = spawn_relay(RelayConfig::default()).await;
	let mut ext = connect_extension(addr).await;
	let tmp = tempfile::tempdir().unwrap();

	let start = post(addr, "start", json!({"outputPath": tmp.path().join("x.webm")}));
	let extension = async {
		let cmd = recv_relay(&mut ext).await;
		assert_eq!(cmd["method"], "startRecording");
		send_json(
			&mut ext,
			json!({"id": cmd["id"], "error": {"message": "tab capture denied"}}),
		)
		.await;
	};
	let (response, ()) = tokio::join!(start, extension);

	assert_eq!(response["success"], false);
	assert_eq!(response["error"], "tab capture denied");
	assert_eq!(status(addr).await["state"], "idle");
}
