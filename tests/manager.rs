use std::sync::{Arc, Mutex};
use std::time::Duration;

use plugvisor::errors::PlugvisorError;
use plugvisor::ipc::control::ControlRequest;
use plugvisor::manager::{Manager, PluginStatus};
use plugvisor::plugin::JobFactories;
use plugvisor::types::{PluginState, ScheduleKind};
use plugvisor_test_utils::builders::{DescriptorBuilder, fast_config};
use plugvisor_test_utils::fake_jobs::{BlockingJob, CountingJob, FailingJob, RecordingNotifier};
use plugvisor_test_utils::{init_tracing, wait_until, with_timeout};
use serde_json::{Map, Value, json};

/// Factories with `counting`, `failing`, `blocking` and `stubborn` jobs.
fn factories(
    counting: &CountingJob,
    blocking: &BlockingJob,
    stubborn: &BlockingJob,
) -> JobFactories {
    let mut factories = JobFactories::empty();
    let c = counting.clone();
    factories.register("counting", move |_, _| Ok(c.shared()));
    factories.register("failing", |_, _| Ok(FailingJob::always().shared()));
    let b = blocking.clone();
    factories.register("blocking", move |_, _| Ok(b.shared()));
    let s = stubborn.clone();
    factories.register("stubborn", move |_, _| Ok(s.shared()));
    factories
}

fn manager() -> (Manager, CountingJob, BlockingJob, BlockingJob) {
    init_tracing();
    let counting = CountingJob::new();
    let blocking = BlockingJob::cooperative();
    let stubborn = BlockingJob::stubborn();
    let manager = Manager::new(
        Arc::new(fast_config()),
        factories(&counting, &blocking, &stubborn),
    )
    .with_root_privileges(false);
    (manager, counting, blocking, stubborn)
}

fn state(statuses: &[PluginStatus], name: &str) -> PluginState {
    statuses
        .iter()
        .find(|s| s.name == name)
        .map(|s| s.state)
        .unwrap_or_else(|| panic!("{name} not listed"))
}

#[tokio::test]
async fn duplicate_registration_is_rejected_without_mutation() {
    let (mut manager, ..) = manager();
    manager
        .register(DescriptorBuilder::daemon("dup").implementation("blocking").build())
        .unwrap();

    let err = manager
        .register(DescriptorBuilder::one_time("dup").implementation("counting").build())
        .unwrap_err();

    assert!(matches!(err, PlugvisorError::DuplicatePlugin(ref n) if n == "dup"));
    assert_eq!(manager.plugin_names().collect::<Vec<_>>(), vec!["dup"]);
    assert_eq!(manager.descriptor("dup").unwrap().implementation, "blocking");
    assert_eq!(manager.descriptor("dup").unwrap().kind(), ScheduleKind::Daemon);
}

#[tokio::test]
async fn start_all_then_stop_all() {
    let (mut manager, _, blocking, _) = manager();
    manager
        .register(DescriptorBuilder::daemon("a").implementation("blocking").build())
        .unwrap();
    manager
        .register(DescriptorBuilder::daemon("b").implementation("blocking").build())
        .unwrap();

    let before = manager.list().await;
    assert_eq!(state(&before, "a"), PluginState::NeverStarted);

    assert_eq!(manager.start_all(), 2);
    wait_until(Duration::from_secs(2), || blocking.runs() == 2).await;

    let running = manager.list().await;
    assert_eq!(state(&running, "a"), PluginState::Running);
    assert_eq!(state(&running, "b"), PluginState::Running);

    with_timeout(manager.stop_all()).await;
    let stopped = manager.list().await;
    assert_eq!(state(&stopped, "a"), PluginState::Stopped);
    assert_eq!(state(&stopped, "b"), PluginState::Stopped);

    // Second call is a no-op.
    with_timeout(manager.stop_all()).await;
}

#[tokio::test]
async fn construction_failure_skips_only_that_plugin() {
    let (mut manager, counting, ..) = manager();
    manager
        .register(DescriptorBuilder::one_time("bad").implementation("nope").build())
        .unwrap();
    manager
        .register(DescriptorBuilder::one_time("good").implementation("counting").build())
        .unwrap();

    assert_eq!(manager.start_all(), 1);
    wait_until(Duration::from_secs(2), || counting.runs() == 1).await;

    let err = manager.start_plugin("bad", None, None, false).unwrap_err();
    assert!(matches!(err, PlugvisorError::PluginConstruction { .. }));

    let list = manager.list().await;
    assert_eq!(state(&list, "bad"), PluginState::NeverStarted);
}

#[tokio::test]
async fn one_time_plugins_report_finished_or_failed() {
    let (mut manager, ..) = manager();
    manager
        .register(DescriptorBuilder::one_time("ok").implementation("counting").build())
        .unwrap();
    manager
        .register(
            DescriptorBuilder::one_time("broken")
                .implementation("failing")
                .restart_on_failure(false)
                .build(),
        )
        .unwrap();

    manager.start_all();
    for _ in 0..200 {
        if !manager.is_running("ok") && !manager.is_running("broken") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let list = manager.list().await;
    assert_eq!(state(&list, "ok"), PluginState::Finished);
    assert_eq!(state(&list, "broken"), PluginState::Failed);
}

#[tokio::test]
async fn stop_all_keeps_states_of_plugins_that_already_exited() {
    let (mut manager, counting, ..) = manager();
    manager
        .register(DescriptorBuilder::one_time("ok").implementation("counting").build())
        .unwrap();
    manager
        .register(DescriptorBuilder::one_time("broken").implementation("failing").build())
        .unwrap();
    manager
        .register(DescriptorBuilder::daemon("d").implementation("blocking").build())
        .unwrap();

    manager.start_all();
    wait_until(Duration::from_secs(2), || counting.runs() == 1).await;
    for _ in 0..200 {
        if !manager.is_running("ok") && !manager.is_running("broken") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    with_timeout(manager.stop_all()).await;
    let list = manager.list().await;
    assert_eq!(state(&list, "ok"), PluginState::Finished);
    assert_eq!(state(&list, "broken"), PluginState::Failed);
    assert_eq!(state(&list, "d"), PluginState::Stopped);
}

#[tokio::test]
async fn notifier_reaches_plugins_started_by_the_manager() {
    let (manager, ..) = manager();
    let notifier = RecordingNotifier::default();
    let mut manager = manager.with_notifier(Arc::new(notifier.clone()));
    manager
        .register(
            DescriptorBuilder::one_time("broken")
                .implementation("failing")
                .webhook("https://hooks.example/broken")
                .build(),
        )
        .unwrap();

    manager.start_plugin("broken", None, None, false).unwrap();
    wait_until(Duration::from_secs(2), || notifier.sent().len() == 1).await;

    let sent = notifier.sent();
    assert_eq!(sent[0].0, "https://hooks.example/broken");
    assert_eq!(sent[0].1["plugin"], "broken");
    with_timeout(manager.stop_all()).await;
}

#[tokio::test]
async fn start_checks_name_running_and_privileges() {
    let (mut manager, ..) = manager();
    manager
        .register(DescriptorBuilder::daemon("d").implementation("blocking").build())
        .unwrap();
    manager
        .register(
            DescriptorBuilder::daemon("root-only")
                .implementation("blocking")
                .requires_root(true)
                .build(),
        )
        .unwrap();

    assert!(matches!(
        manager.start_plugin("ghost", None, None, false),
        Err(PlugvisorError::PluginNotFound(_))
    ));

    manager.start_plugin("d", None, None, false).unwrap();
    assert!(matches!(
        manager.start_plugin("d", None, None, false),
        Err(PlugvisorError::AlreadyRunning(_))
    ));

    assert!(matches!(
        manager.start_plugin("root-only", None, None, false),
        Err(PlugvisorError::PermissionDenied(_))
    ));
    manager.start_plugin("root-only", None, None, true).unwrap();
    assert!(manager.is_running("root-only"));

    with_timeout(manager.stop_all()).await;
}

#[tokio::test]
async fn start_all_skips_root_only_plugins_when_unprivileged() {
    let (mut manager, ..) = manager();
    manager
        .register(
            DescriptorBuilder::daemon("root-only")
                .implementation("blocking")
                .requires_root(true)
                .build(),
        )
        .unwrap();

    assert_eq!(manager.start_all(), 0);
    assert!(!manager.is_running("root-only"));
}

#[tokio::test]
async fn overrides_apply_to_the_instance_only() {
    init_tracing();
    let seen: Arc<Mutex<Vec<(Vec<Value>, Map<String, Value>)>>> = Arc::default();
    let mut factories = JobFactories::empty();
    let record = Arc::clone(&seen);
    factories.register("recording", move |_, descriptor| {
        record
            .lock()
            .unwrap()
            .push((descriptor.args.clone(), descriptor.kwargs.clone()));
        Ok(CountingJob::new().shared())
    });

    let mut manager = Manager::new(Arc::new(fast_config()), factories);
    manager
        .register(
            DescriptorBuilder::one_time("r")
                .implementation("recording")
                .arg("registered")
                .build(),
        )
        .unwrap();

    let mut kwargs = Map::new();
    kwargs.insert("level".to_string(), json!(3));
    manager
        .start_plugin("r", Some(vec![json!("override")]), Some(kwargs.clone()), false)
        .unwrap();

    let seen = seen.lock().unwrap().clone();
    assert_eq!(seen, vec![(vec![json!("override")], kwargs)]);

    let registered = manager.descriptor("r").unwrap();
    assert_eq!(registered.args, vec![json!("registered")]);
    assert!(registered.kwargs.is_empty());
}

#[tokio::test]
async fn stop_escalates_for_stuck_one_time_runs() {
    let (mut manager, _, _, stubborn) = manager();
    manager
        .register(DescriptorBuilder::one_time("stuck").implementation("stubborn").build())
        .unwrap();

    manager.start_plugin("stuck", None, None, false).unwrap();
    wait_until(Duration::from_secs(2), || stubborn.runs() == 1).await;

    with_timeout(manager.stop_plugin("stuck")).await.unwrap();
    assert!(!manager.is_running("stuck"));
    assert_eq!(state(&manager.list().await, "stuck"), PluginState::Stopped);
}

#[tokio::test]
async fn stop_aborts_daemons_that_ignore_stop() {
    let (mut manager, _, _, stubborn) = manager();
    manager
        .register(DescriptorBuilder::daemon("deaf").implementation("stubborn").build())
        .unwrap();

    manager.start_plugin("deaf", None, None, false).unwrap();
    wait_until(Duration::from_secs(2), || stubborn.runs() == 1).await;

    with_timeout(manager.stop_plugin("deaf")).await.unwrap();
    assert!(!manager.is_running("deaf"));
}

#[tokio::test]
async fn stop_of_idle_plugin_is_a_no_op_and_restart_starts_it() {
    let (mut manager, _, blocking, _) = manager();
    manager
        .register(DescriptorBuilder::daemon("d").implementation("blocking").build())
        .unwrap();

    manager.stop_plugin("d").await.unwrap();
    assert!(matches!(
        manager.stop_plugin("ghost").await,
        Err(PlugvisorError::PluginNotFound(_))
    ));

    manager.restart_plugin("d", None, None, false).await.unwrap();
    wait_until(Duration::from_secs(2), || blocking.runs() == 1).await;
    with_timeout(manager.restart_plugin("d", None, None, false))
        .await
        .unwrap();
    wait_until(Duration::from_secs(2), || blocking.runs() == 2).await;
    assert!(manager.is_running("d"));

    with_timeout(manager.stop_all()).await;
}

#[tokio::test]
async fn handle_request_lists_and_reports_errors() {
    let (mut manager, ..) = manager();
    manager
        .register(DescriptorBuilder::daemon("a").implementation("blocking").build())
        .unwrap();
    manager
        .register(DescriptorBuilder::one_time("b").implementation("counting").build())
        .unwrap();

    let list = manager.handle_request(ControlRequest::list()).await;
    assert!(list.is_ok());
    let names: Vec<&str> = list
        .data
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["a", "b"]);
    assert_eq!(list.data[0]["state"], "never_started");
    assert_eq!(list.data[0]["kind"], "daemon");

    let missing = manager.handle_request(ControlRequest::start("ghost")).await;
    assert!(!missing.is_ok());
    assert!(missing.message.contains("ghost"));

    let no_name = manager
        .handle_request(ControlRequest::new(plugvisor::ipc::ControlCommand::Stop))
        .await;
    assert!(!no_name.is_ok());

    let started = manager.handle_request(ControlRequest::start("a")).await;
    assert!(started.is_ok(), "{}", started.message);
    assert_eq!(started.data["state"], "running");

    with_timeout(manager.stop_all()).await;
}
