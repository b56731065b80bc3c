use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use plugvisor::ipc::control::{
    ControlRequest, ControlResponse, ResponseStatus, send_request, serve,
};
use plugvisor::ipc::frame::{read_frame, write_frame};
use plugvisor::manager::{Manager, control_channel};
use plugvisor::plugin::JobFactories;
use plugvisor_test_utils::builders::{DescriptorBuilder, fast_config};
use plugvisor_test_utils::fake_jobs::BlockingJob;
use plugvisor_test_utils::{init_tracing, with_timeout};
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const TIMEOUT: Duration = Duration::from_secs(2);

struct Harness {
    addr: SocketAddr,
    shutdown: CancellationToken,
    manager: JoinHandle<Manager>,
    blocking: BlockingJob,
}

/// A manager with two registered daemons, served on an ephemeral port.
async fn harness(recv_timeout: Duration) -> Harness {
    init_tracing();
    let blocking = BlockingJob::cooperative();
    let mut factories = JobFactories::empty();
    let job = blocking.clone();
    factories.register("blocking", move |_, _| Ok(job.shared()));

    let mut manager = Manager::new(Arc::new(fast_config()), factories);
    for name in ["alpha", "beta"] {
        manager
            .register(DescriptorBuilder::daemon(name).implementation("blocking").build())
            .unwrap();
    }

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (handle, requests) = control_channel(8);
    let shutdown = CancellationToken::new();

    tokio::spawn(serve(listener, handle, recv_timeout, shutdown.clone()));
    let token = shutdown.clone();
    let manager = tokio::spawn(async move {
        manager.run(requests, token).await.unwrap();
        manager
    });

    Harness {
        addr,
        shutdown,
        manager,
        blocking,
    }
}

#[tokio::test]
async fn list_returns_both_plugins() {
    let h = harness(TIMEOUT).await;

    let response = send_request(&h.addr.to_string(), &ControlRequest::list(), TIMEOUT)
        .await
        .unwrap();

    assert_eq!(response.status, ResponseStatus::Ok);
    let names: Vec<&str> = response
        .data
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["alpha", "beta"]);

    h.shutdown.cancel();
    with_timeout(h.manager).await.unwrap();
}

#[tokio::test]
async fn start_stop_restart_round_trip() {
    let h = harness(TIMEOUT).await;
    let addr = h.addr.to_string();

    let started = send_request(&addr, &ControlRequest::start("alpha"), TIMEOUT)
        .await
        .unwrap();
    assert!(started.is_ok(), "{}", started.message);

    let again = send_request(&addr, &ControlRequest::start("alpha"), TIMEOUT)
        .await
        .unwrap();
    assert_eq!(again.status, ResponseStatus::Error);
    assert!(again.message.contains("already running"), "{}", again.message);

    let restarted = send_request(&addr, &ControlRequest::restart("alpha"), TIMEOUT)
        .await
        .unwrap();
    assert!(restarted.is_ok(), "{}", restarted.message);

    let stopped = send_request(&addr, &ControlRequest::stop("alpha"), TIMEOUT)
        .await
        .unwrap();
    assert!(stopped.is_ok());
    assert_eq!(stopped.data["state"], "stopped");
    assert_eq!(h.blocking.runs(), 2);

    h.shutdown.cancel();
    with_timeout(h.manager).await.unwrap();
}

#[tokio::test]
async fn unknown_plugin_is_an_error_response() {
    let h = harness(TIMEOUT).await;

    let response = send_request(&h.addr.to_string(), &ControlRequest::stop("ghost"), TIMEOUT)
        .await
        .unwrap();

    assert_eq!(response.status, ResponseStatus::Error);
    assert!(response.message.contains("ghost"));

    h.shutdown.cancel();
    with_timeout(h.manager).await.unwrap();
}

#[tokio::test]
async fn malformed_request_gets_error_and_manager_survives() {
    let h = harness(TIMEOUT).await;

    let mut stream = TcpStream::connect(h.addr).await.unwrap();
    write_frame(&mut stream, &json!({"cmd": "explode"})).await.unwrap();
    let response: ControlResponse = with_timeout(read_frame(&mut stream)).await.unwrap();
    assert_eq!(response.status, ResponseStatus::Error);

    let mut stream = TcpStream::connect(h.addr).await.unwrap();
    stream.write_all(&[0, 0, 0, 3, b'{', b'{', b'{']).await.unwrap();
    let response: ControlResponse = with_timeout(read_frame(&mut stream)).await.unwrap();
    assert_eq!(response.status, ResponseStatus::Error);

    // Still serving.
    let list = send_request(&h.addr.to_string(), &ControlRequest::list(), TIMEOUT)
        .await
        .unwrap();
    assert!(list.is_ok());

    h.shutdown.cancel();
    with_timeout(h.manager).await.unwrap();
}

#[tokio::test]
async fn silent_client_times_out() {
    let h = harness(Duration::from_millis(100)).await;

    let mut stream = TcpStream::connect(h.addr).await.unwrap();
    let response: ControlResponse = with_timeout(read_frame(&mut stream)).await.unwrap();
    assert_eq!(response.status, ResponseStatus::Error);
    assert!(response.message.contains("no request received"), "{}", response.message);

    h.shutdown.cancel();
    with_timeout(h.manager).await.unwrap();
}

#[tokio::test]
async fn request_json_uses_wire_field_names() {
    let request = ControlRequest::start("alpha")
        .args(vec![json!(1)])
        .force(true);
    let value = serde_json::to_value(&request).unwrap();
    assert_eq!(value["cmd"], "start");
    assert_eq!(value["plugin_name"], "alpha");
    assert_eq!(value["args"], json!([1]));
    assert_eq!(value["force"], true);

    let minimal: ControlRequest = serde_json::from_value(json!({"cmd": "list"})).unwrap();
    assert_eq!(minimal, ControlRequest::list());
}
