#![cfg(unix)]

use std::time::{Duration, Instant};

use plugvisor::exec::CommandJob;
use plugvisor::plugin::{Job, JobFactories, StopSignal};
use plugvisor_test_utils::builders::{DescriptorBuilder, test_context};
use plugvisor_test_utils::{init_tracing, with_timeout};

#[test]
fn command_comes_from_kwargs_or_args() {
    let from_kwargs = DescriptorBuilder::one_time("k")
        .kwarg("cmd", "echo from-kwargs")
        .arg("ignored")
        .build();
    assert_eq!(
        CommandJob::from_descriptor(&from_kwargs).unwrap().cmd(),
        "echo from-kwargs"
    );

    let from_args = DescriptorBuilder::one_time("a")
        .arg("echo")
        .arg("hello")
        .arg(3)
        .build();
    assert_eq!(CommandJob::from_descriptor(&from_args).unwrap().cmd(), "echo hello 3");

    let empty = DescriptorBuilder::one_time("e").build();
    assert!(CommandJob::from_descriptor(&empty).is_err());
}

#[tokio::test]
async fn exit_status_decides_success() {
    init_tracing();
    let ok = CommandJob::new("ok", "echo hi");
    with_timeout(ok.run(StopSignal::new())).await.unwrap();

    let bad = CommandJob::new("bad", "exit 3");
    let err = with_timeout(bad.run(StopSignal::new())).await.unwrap_err();
    assert!(err.to_string().contains("code 3"), "{err}");
}

#[tokio::test]
async fn working_directory_is_honoured() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let descriptor = DescriptorBuilder::one_time("cwd")
        .kwarg("cmd", "touch marker")
        .kwarg("cwd", dir.path().to_str().unwrap())
        .build();

    let job = CommandJob::from_descriptor(&descriptor).unwrap();
    with_timeout(job.run(StopSignal::new())).await.unwrap();
    assert!(dir.path().join("marker").exists());
}

#[tokio::test]
async fn stop_kills_a_running_command() {
    init_tracing();
    let job = CommandJob::new("sleeper", "sleep 30");
    let stop = StopSignal::new();

    let setter = stop.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        setter.set();
    });

    let started = Instant::now();
    with_timeout(job.run(stop)).await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn built_in_factory_constructs_command_plugins() {
    init_tracing();
    let factories = JobFactories::new();
    assert!(factories.contains("command"));

    let descriptor = DescriptorBuilder::one_time("echo")
        .kwarg("cmd", "true")
        .build();
    let plugin = factories.construct(&test_context(), &descriptor).unwrap();
    with_timeout(plugin.start()).await.unwrap();

    let missing = DescriptorBuilder::one_time("nothing").build();
    assert!(factories.construct(&test_context(), &missing).is_err());
}
