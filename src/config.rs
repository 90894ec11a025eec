use std::env;
use std::time::Duration;

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;

use crate::orchestrate::PollSettings;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, env = "CONFIG_FILE")]
    pub config: Option<String>,

    /// Port to listen on
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    /// Default agent for requests that do not name one
    #[arg(long)]
    pub agent_id: Option<String>,

    /// Poll deadline in seconds
    #[arg(long)]
    pub poll_timeout_secs: Option<u32>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    pub polling: PollingConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

#[derive(Deserialize, Clone)]
pub struct UpstreamConfig {
    /// API key exchanged for bearer tokens.
    #[serde(default)]
    pub api_key: String,
    /// Token exchange endpoint.
    #[serde(default)]
    pub token_url: String,
    /// Run submission endpoint.
    #[serde(default)]
    pub runs_url: String,
    /// Run status base; defaults to `runs_url`.
    #[serde(default)]
    pub run_status_url: Option<String>,
    /// Thread/message creation endpoint; defaults to `runs_url`.
    #[serde(default)]
    pub messages_url: Option<String>,
    /// Agent used when a request names none.
    #[serde(default)]
    pub agent_id: Option<String>,
    /// Workflow trigger endpoint used by `/analyze`.
    #[serde(default)]
    pub workflows_url: Option<String>,
    /// Passed upstream as `stream_timeout`.
    pub stream_timeout_ms: u64,
    pub connect_timeout_secs: u64,
    /// Reuse tokens until shortly before expiry.
    pub cache_token: bool,
}

impl std::fmt::Debug for UpstreamConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamConfig")
            .field("token_url", &self.token_url)
            .field("runs_url", &self.runs_url)
            .field("run_status_url", &self.run_status_url)
            .field("messages_url", &self.messages_url)
            .field("agent_id", &self.agent_id)
            .field("workflows_url", &self.workflows_url)
            .field("stream_timeout_ms", &self.stream_timeout_ms)
            .field("cache_token", &self.cache_token)
            .finish_non_exhaustive()
    }
}

impl UpstreamConfig {
    /// Check that every required setting is present.
    pub fn validate(&self) -> Result<(), String> {
        for (value, key, legacy) in [
            (&self.api_key, "upstream.api_key", "IBM_API_KEY"),
            (&self.token_url, "upstream.token_url", "IBM_TOKEN_URL"),
            (&self.runs_url, "upstream.runs_url", "ORCHESTRATE_RUNS_URL"),
        ] {
            if value.trim().is_empty() {
                return Err(format!("Missing required setting: {key} (or {legacy})"));
            }
        }
        Ok(())
    }

    /// Optional URL settings, with blank values treated as unset.
    pub fn run_status_url(&self) -> Option<&str> {
        non_blank(self.run_status_url.as_deref())
    }

    pub fn messages_url(&self) -> Option<&str> {
        non_blank(self.messages_url.as_deref())
    }

    pub fn workflows_url(&self) -> Option<&str> {
        non_blank(self.workflows_url.as_deref())
    }

    pub fn default_agent(&self) -> Option<&str> {
        non_blank(self.agent_id.as_deref())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

#[derive(Debug, Deserialize, Clone)]
pub struct PollingConfig {
    pub timeout_secs: u64,
    pub interval_ms: u64,
}

impl PollingConfig {
    /// A zero interval would poll the upstream in a tight loop.
    pub fn validate(&self) -> Result<(), String> {
        if self.interval_ms == 0 {
            return Err("polling.interval_ms must be greater than zero".to_string());
        }
        if self.timeout_secs == 0 {
            return Err("polling.timeout_secs must be greater than zero".to_string());
        }
        Ok(())
    }

    pub fn settings(&self) -> PollSettings {
        PollSettings {
            timeout: Duration::from_secs(self.timeout_secs),
            interval: Duration::from_millis(self.interval_ms),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct MetricsConfig {
    /// Samples kept in the rolling buffer.
    pub capacity: usize,
    /// Seconds between live samples.
    pub interval_secs: u64,
}

/// Un-prefixed variable names accepted as low-priority defaults.
const LEGACY_ENV: &[(&str, &str)] = &[
    ("IBM_API_KEY", "upstream.api_key"),
    ("IBM_TOKEN_URL", "upstream.token_url"),
    ("ORCHESTRATE_RUNS_URL", "upstream.runs_url"),
    ("ORCHESTRATE_RUN_STATUS_URL", "upstream.run_status_url"),
    ("ORCHESTRATE_MESSAGES_URL", "upstream.messages_url"),
    ("AGENT_ID", "upstream.agent_id"),
    ("ORCHESTRATE_WORKFLOWS_URL", "upstream.workflows_url"),
];

/// Workflow endpoint of an Orchestrate instance.
fn workflows_url_for(region: &str, instance_id: &str) -> String {
    format!(
        "https://api.{region}.watson-orchestrate.cloud.ibm.com/instances/{instance_id}/v1/orchestrate/digital-employees/allskills"
    )
}

impl AppConfig {
    /// Check every section needed to serve.
    pub fn validate(&self) -> Result<(), String> {
        self.upstream.validate()?;
        self.polling.validate()
    }

    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from_args(std::env::args())
    }

    /// Priority: CLI flag > `RELAY_` env > config file > legacy env > defaults.
    pub fn load_from_args<I, T>(args: I) -> Result<Self, config::ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let cli =
            Cli::try_parse_from(args).map_err(|e| config::ConfigError::Message(e.to_string()))?;

        let mut builder = Config::builder()
            .set_default("server.port", 8000)?
            .set_default("server.host", "0.0.0.0")?
            .set_default("upstream.stream_timeout_ms", 120_000)?
            .set_default("upstream.connect_timeout_secs", 10)?
            .set_default("upstream.cache_token", false)?
            .set_default("polling.timeout_secs", 60)?
            .set_default("polling.interval_ms", 1000)?
            .set_default("metrics.capacity", 1000)?
            .set_default("metrics.interval_secs", 5)?;

        if let (Ok(region), Ok(instance)) =
            (env::var("IBM_ORCH_REGION"), env::var("IBM_ORCH_INSTANCE_ID"))
            && !region.trim().is_empty()
            && !instance.trim().is_empty()
        {
            builder = builder.set_default(
                "upstream.workflows_url",
                workflows_url_for(region.trim(), instance.trim()),
            )?;
        }

        for (var, key) in LEGACY_ENV {
            if let Ok(val) = env::var(var)
                && !val.trim().is_empty()
            {
                builder = builder.set_default(*key, val)?;
            }
        }

        builder = match &cli.config {
            Some(path) => builder.add_source(File::with_name(path)),
            None => builder.add_source(File::with_name("config").required(false)),
        };

        // RELAY_UPSTREAM__RUNS_URL=... style overrides
        builder = builder.add_source(
            Environment::with_prefix("RELAY")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        if let Some(port) = cli.port {
            builder = builder.set_override("server.port", i64::from(port))?;
        }
        if let Some(agent) = cli.agent_id {
            builder = builder.set_override("upstream.agent_id", agent)?;
        }
        if let Some(secs) = cli.poll_timeout_secs {
            builder = builder.set_override("polling.timeout_secs", i64::from(secs))?;
        }

        builder.build()?.try_deserialize()
    }
}
