use agent_run_relay::config::AppConfig;
use serial_test::serial;
use std::env;
use std::fs;
use std::time::Duration;

const VARS: &[&str] = &[
    "CONFIG_FILE",
    "PORT",
    "RELAY_SERVER__PORT",
    "RELAY_UPSTREAM__RUNS_URL",
    "RELAY_UPSTREAM__CACHE_TOKEN",
    "RELAY_POLLING__INTERVAL_MS",
    "IBM_API_KEY",
    "IBM_TOKEN_URL",
    "ORCHESTRATE_RUNS_URL",
    "ORCHESTRATE_RUN_STATUS_URL",
    "ORCHESTRATE_MESSAGES_URL",
    "AGENT_ID",
    "ORCHESTRATE_WORKFLOWS_URL",
    "IBM_ORCH_REGION",
    "IBM_ORCH_INSTANCE_ID",
];

// Helper to clear environment variables that might interfere with tests
fn clear_env_vars() {
    for var in VARS {
        unsafe {
            env::remove_var(var);
        }
    }
}

fn load(args: &[&str]) -> AppConfig {
    let mut argv = vec!["agent-run-relay"];
    argv.extend_from_slice(args);
    AppConfig::load_from_args(argv).expect("Failed to load config")
}

#[test]
#[serial]
fn test_default_config() {
    clear_env_vars();

    let config = load(&[]);
    assert_eq!(config.server.port, 8000);
    assert_eq!(config.server.host, "0.0.0.0");
    assert_eq!(config.polling.settings().timeout, Duration::from_secs(60));
    assert_eq!(config.polling.settings().interval, Duration::from_secs(1));
    assert_eq!(config.upstream.stream_timeout_ms, 120_000);
    assert_eq!(config.metrics.capacity, 1000);
    assert!(!config.upstream.cache_token);

    // Nothing configured upstream yet.
    let err = config.upstream.validate().unwrap_err();
    assert!(err.contains("upstream.api_key"));
}

#[test]
#[serial]
fn test_legacy_env_names() {
    clear_env_vars();
    unsafe {
        env::set_var("IBM_API_KEY", "k-123");
        env::set_var("IBM_TOKEN_URL", "https://iam.example.com/identity/token");
        env::set_var("ORCHESTRATE_RUNS_URL", "https://api.example.com/v1/orchestrate/runs");
        env::set_var("AGENT_ID", "A1");
    }

    let config = load(&[]);
    assert_eq!(config.upstream.api_key, "k-123");
    assert_eq!(
        config.upstream.runs_url,
        "https://api.example.com/v1/orchestrate/runs"
    );
    assert_eq!(config.upstream.default_agent(), Some("A1"));
    assert_eq!(config.upstream.run_status_url(), None);
    assert!(config.upstream.validate().is_ok());

    clear_env_vars();
}

#[test]
#[serial]
fn test_env_override() {
    clear_env_vars();
    unsafe {
        env::set_var("ORCHESTRATE_RUNS_URL", "https://legacy.example.com/runs");
        env::set_var("RELAY_UPSTREAM__RUNS_URL", "https://new.example.com/runs");
        env::set_var("RELAY_SERVER__PORT", "9090");
        env::set_var("RELAY_UPSTREAM__CACHE_TOKEN", "true");
    }

    let config = load(&[]);
    assert_eq!(config.server.port, 9090);
    assert_eq!(config.upstream.runs_url, "https://new.example.com/runs");
    assert!(config.upstream.cache_token);

    clear_env_vars();
}

#[test]
#[serial]
fn test_file_load() {
    clear_env_vars();

    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("relay.yaml");
    fs::write(
        &path,
        r"
server:
  port: 7070
upstream:
  runs_url: https://file.example.com/runs
  messages_url: https://file.example.com/messages
polling:
  timeout_secs: 5
  interval_ms: 250
",
    )
    .expect("Failed to write temp config");

    let path = path.to_string_lossy().into_owned();
    let config = load(&["--config", &path]);
    assert_eq!(config.server.port, 7070);
    assert_eq!(
        config.upstream.messages_url(),
        Some("https://file.example.com/messages")
    );
    assert_eq!(config.polling.settings().timeout, Duration::from_secs(5));
    assert_eq!(config.polling.settings().interval, Duration::from_millis(250));
}

#[test]
#[serial]
fn test_cli_beats_env() {
    clear_env_vars();
    unsafe {
        env::set_var("RELAY_SERVER__PORT", "9090");
        env::set_var("AGENT_ID", "from-env");
    }

    let config = load(&["--port", "5050", "--agent-id", "from-cli", "--poll-timeout-secs", "3"]);
    assert_eq!(config.server.port, 5050);
    assert_eq!(config.upstream.default_agent(), Some("from-cli"));
    assert_eq!(config.polling.timeout_secs, 3);

    clear_env_vars();
}

#[test]
#[serial]
fn test_blank_optional_urls_are_unset() {
    clear_env_vars();
    unsafe {
        env::set_var("ORCHESTRATE_RUN_STATUS_URL", "   ");
    }

    let config = load(&[]);
    assert_eq!(config.upstream.run_status_url(), None);

    clear_env_vars();
}

#[test]
#[serial]
fn test_file_beats_legacy_env() {
    clear_env_vars();
    unsafe {
        env::set_var("ORCHESTRATE_RUNS_URL", "https://legacy.example.com/runs");
        env::set_var("AGENT_ID", "legacy-agent");
    }

    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("relay.yaml");
    fs::write(&path, "upstream:\n  runs_url: https://file.example.com/runs\n")
        .expect("Failed to write temp config");

    let path = path.to_string_lossy().into_owned();
    let config = load(&["--config", &path]);
    assert_eq!(config.upstream.runs_url, "https://file.example.com/runs");
    // Legacy names still fill what the file leaves out.
    assert_eq!(config.upstream.default_agent(), Some("legacy-agent"));

    clear_env_vars();
}

#[test]
#[serial]
fn test_zero_poll_interval_rejected() {
    clear_env_vars();
    unsafe {
        env::set_var("IBM_API_KEY", "k-123");
        env::set_var("IBM_TOKEN_URL", "https://iam.example.com/identity/token");
        env::set_var("ORCHESTRATE_RUNS_URL", "https://api.example.com/v1/orchestrate/runs");
        env::set_var("RELAY_POLLING__INTERVAL_MS", "0");
    }

    let config = load(&[]);
    assert_eq!(config.polling.interval_ms, 0);
    let err = config.validate().unwrap_err();
    assert!(err.contains("polling.interval_ms"));

    unsafe {
        env::set_var("RELAY_POLLING__INTERVAL_MS", "500");
    }
    assert!(load(&[]).validate().is_ok());

    clear_env_vars();
}

#[test]
#[serial]
fn test_workflows_url_from_instance() {
    clear_env_vars();
    unsafe {
        env::set_var("IBM_ORCH_REGION", "us-south");
        env::set_var("IBM_ORCH_INSTANCE_ID", "inst-42");
    }

    let config = load(&[]);
    assert_eq!(
        config.upstream.workflows_url(),
        Some(
            "https://api.us-south.watson-orchestrate.cloud.ibm.com/instances/inst-42/v1/orchestrate/digital-employees/allskills"
        )
    );

    unsafe {
        env::set_var("ORCHESTRATE_WORKFLOWS_URL", "https://wf.example.com/allskills");
    }
    assert_eq!(
        load(&[]).upstream.workflows_url(),
        Some("https://wf.example.com/allskills")
    );

    clear_env_vars();
}
