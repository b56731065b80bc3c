use std::io::Write;
use std::time::Duration;

use plugvisor::config::{load_and_validate, parse_and_validate};
use plugvisor::errors::PlugvisorError;
use plugvisor::manager::Manager;
use plugvisor::plugin::{JobFactories, Schedule};
use plugvisor::types::{DurationValue, parse_duration};
use plugvisor_test_utils::builders::{ConfigFileBuilder, interval_section};
use plugvisor_test_utils::init_tracing;
use tempfile::NamedTempFile;

const FULL: &str = r#"
[config]
listen_addr = "127.0.0.1:9000"
stop_timeout = "2s"
one_time_timeout = 3
recv_timeout = "500ms"
max_attempts = 4
base_delay = "2s"
max_delay = "1m"

[plugin.heartbeat]
kind = "interval"
every = "30s"
kwargs = { cmd = "echo alive" }

[plugin.nightly]
kind = "cron"
cron = "0 3 * * *"
run_on_startup = true
args = ["./backup.sh", "--full"]
restart_on_failure = false

[plugin.tunnel]
kind = "process"
command = ["tailscaled", "--state", "mem:"]
cwd = "/tmp"
grace = "4s"
requires_root = true
max_attempts = 10
base_delay = "500ms"

[plugin.cleanup]
kind = "one_time"
implementation = "command"
webhook = "https://hooks.example/cleanup"
kwargs = { cmd = "rm -rf /tmp/scratch" }
"#;

#[test]
fn loads_full_config_from_file() {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(FULL.as_bytes()).unwrap();

    let cfg = load_and_validate(file.path()).unwrap();
    let m = &cfg.manager;
    assert_eq!(m.listen_addr, "127.0.0.1:9000");
    assert_eq!(m.stop_timeout, Duration::from_secs(2));
    assert_eq!(m.one_time_timeout, Duration::from_secs(3));
    assert_eq!(m.recv_timeout, Duration::from_millis(500));
    assert_eq!(m.retry.max_attempts, 4);
    assert_eq!(m.retry.base_delay, Duration::from_secs(2));
    assert_eq!(m.retry.max_delay, Duration::from_secs(60));

    let descriptors: Vec<_> = cfg
        .descriptors()
        .into_iter()
        .map(|(name, d)| (name, d.unwrap()))
        .collect();
    assert_eq!(descriptors.len(), 4);

    let get = |name: &str| {
        descriptors
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, d)| d.clone())
            .unwrap()
    };

    let heartbeat = get("heartbeat");
    assert_eq!(
        heartbeat.schedule,
        Schedule::Interval {
            every: Duration::from_secs(30)
        }
    );
    assert_eq!(heartbeat.kwarg_str("cmd"), Some("echo alive"));
    assert!(heartbeat.restart_on_failure);
    assert_eq!(heartbeat.retry.max_attempts, 4);

    let nightly = get("nightly");
    match &nightly.schedule {
        Schedule::Cron {
            expression,
            run_on_startup,
        } => {
            assert_eq!(expression.as_str(), "0 3 * * *");
            assert!(*run_on_startup);
        }
        other => panic!("expected cron schedule, got {other:?}"),
    }
    assert!(!nightly.restart_on_failure);
    assert_eq!(nightly.args.len(), 2);

    let tunnel = get("tunnel");
    match &tunnel.schedule {
        Schedule::Process(spec) => {
            assert_eq!(spec.program, "tailscaled");
            assert_eq!(spec.args, vec!["--state", "mem:"]);
            assert_eq!(spec.cwd.as_deref(), Some(std::path::Path::new("/tmp")));
            assert_eq!(spec.grace, Some(Duration::from_secs(4)));
        }
        other => panic!("expected process schedule, got {other:?}"),
    }
    assert!(tunnel.requires_root);
    assert_eq!(tunnel.retry.max_attempts, 10);
    assert_eq!(tunnel.retry.base_delay, Duration::from_millis(500));
    assert_eq!(tunnel.retry.max_delay, Duration::from_secs(60));

    let cleanup = get("cleanup");
    assert_eq!(cleanup.schedule, Schedule::OneTime);
    assert_eq!(cleanup.webhook.as_deref(), Some("https://hooks.example/cleanup"));
}

#[test]
fn empty_config_uses_defaults() {
    let cfg = parse_and_validate("").unwrap();
    assert_eq!(cfg.manager.listen_addr, "127.0.0.1:7421");
    assert_eq!(cfg.manager.recv_timeout, Duration::from_secs(30));
    assert_eq!(cfg.manager.cron_error_delay, Duration::from_secs(60));
    assert_eq!(cfg.manager.retry.max_attempts, 0);
    assert!(cfg.plugins.is_empty());
}

#[test]
fn bad_manager_settings_are_fatal() {
    for toml in [
        "[config]\nbase_delay = \"10s\"\nmax_delay = \"1s\"",
        "[config]\nstop_timeout = 0",
        "[config]\nrecv_timeout = \"soon\"",
        "[config]\nlisten_addr = \"not an address\"",
    ] {
        let err = parse_and_validate(toml).unwrap_err();
        assert!(matches!(err, PlugvisorError::ConfigError(_)), "{toml}: {err}");
    }
}

#[test]
fn malformed_toml_is_a_toml_error() {
    let err = parse_and_validate("[config\nlisten_addr = ").unwrap_err();
    assert!(matches!(err, PlugvisorError::TomlError(_)));
}

#[test]
fn bad_plugin_sections_are_skipped_individually() {
    init_tracing();
    let cfg = parse_and_validate(
        r#"
[plugin.good]
kind = "daemon"
kwargs = { cmd = "sleep 1" }

[plugin.no_every]
kind = "interval"

[plugin.bad_cron]
kind = "cron"
cron = "61 * * * *"

[plugin.never_fires]
kind = "cron"
cron = "0 0 30 2 *"

[plugin.weird]
kind = "sometimes"

[plugin.empty_command]
kind = "process"
command = []
"#,
    )
    .unwrap();

    for (name, descriptor) in cfg.descriptors() {
        match name.as_str() {
            "good" => assert!(descriptor.is_ok()),
            _ => assert!(
                matches!(descriptor, Err(PlugvisorError::ConfigError(_))),
                "{name} should be a config error"
            ),
        }
    }

    let manager = Manager::from_config(&cfg, JobFactories::new());
    assert_eq!(manager.plugin_names().collect::<Vec<_>>(), vec!["good"]);
}

#[test]
fn builder_sections_convert() {
    let cfg = ConfigFileBuilder::new()
        .with_listen_addr("127.0.0.1:0")
        .with_plugin("tick", interval_section("250ms", "true"))
        .build();
    let (_, descriptor) = cfg.descriptors().pop().unwrap();
    assert_eq!(
        descriptor.unwrap().schedule,
        Schedule::Interval {
            every: Duration::from_millis(250)
        }
    );
}

#[test]
fn duration_strings() {
    assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
    assert_eq!(parse_duration("3s").unwrap(), Duration::from_secs(3));
    assert_eq!(parse_duration("1m").unwrap(), Duration::from_secs(60));
    assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
    assert!(parse_duration("").is_err());
    assert!(parse_duration("fast").is_err());
    assert!(parse_duration("18446744073709551615m").is_err());
    assert!(parse_duration("5124095576030432h").is_err());
    assert_eq!(
        DurationValue::Seconds(5).to_duration().unwrap(),
        Duration::from_secs(5)
    );
}

#[test]
fn demo_config_is_valid() {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/demos/Plugvisor.toml");
    let cfg = load_and_validate(path).unwrap();
    for (name, descriptor) in cfg.descriptors() {
        assert!(descriptor.is_ok(), "{name}: {:?}", descriptor.err());
    }
    assert_eq!(cfg.manager.retry.max_delay, Duration::from_secs(300));
}
