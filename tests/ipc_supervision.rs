use std::sync::Arc;
use std::time::Duration;

use plugvisor::errors::{PlugvisorError, Result};
use plugvisor::ipc::supervision::{
    CommandFrame, EventFrame, SupervisionClient, SupervisionCommand, SupervisionEvent,
    serve_worker,
};
use plugvisor::plugin::Plugin;
use plugvisor::plugin::variants::build_plugin;
use plugvisor_test_utils::builders::{DescriptorBuilder, test_context};
use plugvisor_test_utils::fake_jobs::{BlockingJob, CountingJob};
use plugvisor_test_utils::{init_tracing, with_timeout};
use serde_json::{Map, Value, json};
use tokio::io::{DuplexStream, ReadHalf, WriteHalf, duplex, split};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;

const TIMEOUT: Duration = Duration::from_secs(2);

/// `once` is a one-time counting plugin, `daemon` blocks until stopped.
fn build(name: &str, _args: Vec<Value>, _kwargs: Map<String, Value>) -> Result<Arc<dyn Plugin>> {
    let ctx = test_context();
    match name {
        "once" => Ok(build_plugin(
            &ctx,
            DescriptorBuilder::one_time("once").build(),
            CountingJob::new().shared(),
        )),
        "daemon" => Ok(build_plugin(
            &ctx,
            DescriptorBuilder::daemon("daemon").build(),
            BlockingJob::cooperative().shared(),
        )),
        other => Err(PlugvisorError::PluginNotFound(other.to_string())),
    }
}

type Client = SupervisionClient<WriteHalf<DuplexStream>>;

fn connected() -> (Client, UnboundedReceiver<EventFrame>, JoinHandle<Result<()>>) {
    init_tracing();
    let (client_io, worker_io) = duplex(64 * 1024);

    let (worker_read, worker_write) = split(worker_io);
    let worker = tokio::spawn(serve_worker(worker_read, worker_write, build, TIMEOUT));

    let (client_read, client_write): (ReadHalf<DuplexStream>, _) = split(client_io);
    let (client, events) = SupervisionClient::new(client_read, client_write, TIMEOUT);
    (client, events, worker)
}

/// Next unsolicited event with `id`, skipping log lines.
async fn outcome_for(events: &mut UnboundedReceiver<EventFrame>, id: u64) -> SupervisionEvent {
    loop {
        let frame = with_timeout(events.recv()).await.expect("event stream closed");
        if frame.id == id {
            return frame.event;
        }
        assert!(
            matches!(frame.event, SupervisionEvent::Log { .. }),
            "unexpected event {frame:?}"
        );
    }
}

#[test]
fn frames_carry_id_and_tag() {
    let command = CommandFrame {
        id: 7,
        command: SupervisionCommand::Setup {
            plugin_name: "once".to_string(),
            args: vec![],
            kwargs: Map::new(),
        },
    };
    let value = serde_json::to_value(&command).unwrap();
    assert_eq!(value["id"], 7);
    assert_eq!(value["command"], "setup");
    assert_eq!(value["plugin_name"], "once");

    let event: EventFrame =
        serde_json::from_value(json!({"id": 7, "event": "result", "data": {"n": 1}})).unwrap();
    assert_eq!(
        event,
        EventFrame {
            id: 7,
            event: SupervisionEvent::RunResult { data: json!({"n": 1}) },
        }
    );

    let ping: CommandFrame = serde_json::from_value(json!({"id": 1, "command": "ping"})).unwrap();
    assert_eq!(ping.command, SupervisionCommand::Ping);
}

#[tokio::test]
async fn concurrent_pings_are_matched_by_id() {
    let (client, _events, _worker) = connected();
    let (a, b, c) = tokio::join!(client.ping(), client.ping(), client.ping());
    a.unwrap();
    b.unwrap();
    c.unwrap();
}

#[tokio::test]
async fn start_before_setup_is_refused() {
    let (client, _events, _worker) = connected();
    assert!(client.start().await.is_err());
}

#[tokio::test]
async fn setup_of_unknown_plugin_reports_error() {
    let (client, _events, _worker) = connected();
    let err = client.setup("ghost", vec![], Map::new()).await.unwrap_err();
    assert!(matches!(err, PlugvisorError::PluginConstruction { .. }), "{err}");
}

#[tokio::test]
async fn one_time_run_reports_result_under_start_id() {
    let (client, mut events, _worker) = connected();

    client.setup("once", vec![], Map::new()).await.unwrap();
    let id = client.start().await.unwrap();

    let outcome = outcome_for(&mut events, id).await;
    assert_eq!(outcome, SupervisionEvent::RunResult { data: Value::Null });
}

#[tokio::test]
async fn stop_winds_down_a_daemon() {
    let (client, mut events, worker) = connected();

    client.setup("daemon", vec![], Map::new()).await.unwrap();
    let id = client.start().await.unwrap();
    client.ping().await.unwrap();

    with_timeout(client.stop()).await.unwrap();
    let outcome = outcome_for(&mut events, id).await;
    assert_eq!(outcome, SupervisionEvent::RunResult { data: Value::Null });

    drop(client);
    with_timeout(worker).await.unwrap().unwrap();
}

#[tokio::test]
async fn worker_connects_over_tcp() {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let worker = tokio::spawn(async move {
        let stream = TcpStream::connect(addr).await?;
        let (read, write) = stream.into_split();
        serve_worker(read, write, build, TIMEOUT).await
    });

    let (client, _events) = SupervisionClient::accept(&listener, TIMEOUT).await.unwrap();
    client.ping().await.unwrap();
    client.setup("once", vec![], Map::new()).await.unwrap();

    drop(client);
    with_timeout(worker).await.unwrap().unwrap();
}
