//! Executor configuration
//!
//! Every flag can also be set through a `REPLICANT_*` environment variable.
//! Intervals accept either bare seconds (`300`) or a duration string (`5m`).

use anyhow::{Context, bail};
use clap::Parser;
use replicant_core::duration::parse_positive_duration;
use std::time::Duration;

use crate::executor::DedupPolicy;
use crate::renderer::RendererSettings;

/// Default renderer command line; the debugging port and profile directory
/// are appended per generation.
pub const DEFAULT_RENDERER_ARGS: &str = "/headless-shell/headless-shell --headless --no-zygote \
     --no-sandbox --disable-gpu --disable-software-rasterizer --disable-dev-shm-usage \
     --remote-debugging-address=127.0.0.1 --incognito --disable-shared-workers \
     --disable-remote-fonts --disable-background-networking --disable-crash-reporter \
     --disable-default-apps --disable-domain-reliability --disable-extensions \
     --disable-setuid-sandbox";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Clone, Parser)]
#[command(name = "replicant-executor", version, about = "Synthetic transaction executor")]
pub struct Config {
    /// Address the HTTP API listens on
    #[arg(long, env = "REPLICANT_ADDRESS", default_value = "0.0.0.0:8080")]
    pub address: String,

    /// How often the renderer process is recycled
    #[arg(long = "interval", env = "REPLICANT_RECYCLE_INTERVAL", default_value = "300", value_parser = parse_interval)]
    pub recycle_interval: Duration,

    /// Renderer binary followed by its arguments
    #[arg(long, env = "REPLICANT_RENDERER_ARGS", default_value = DEFAULT_RENDERER_ARGS)]
    pub args: String,

    /// Log level used when RUST_LOG is not set
    #[arg(long, env = "REPLICANT_LOG_LEVEL", default_value = "info")]
    pub level: String,

    /// First remote-debugging port; consecutive generations alternate with the next port
    #[arg(long, env = "REPLICANT_DEBUGGING_PORT", default_value_t = 9222)]
    pub debugging_port: u16,

    /// How long an outgoing renderer may keep serving in-flight runs
    #[arg(long, env = "REPLICANT_DRAIN_GRACE", default_value = "30", value_parser = parse_interval)]
    pub drain_grace: Duration,

    /// Health checks a new renderer gets before it is given up on
    #[arg(long, env = "REPLICANT_HEALTH_ATTEMPTS", default_value_t = 10)]
    pub health_attempts: u32,

    /// What a concurrent run of an already running transaction does
    #[arg(long, env = "REPLICANT_DEDUP", value_enum, default_value = "reject")]
    pub dedup: DedupPolicy,

    /// Memory a single transaction script may allocate, in MiB
    #[arg(long, env = "REPLICANT_SCRIPT_MEMORY_LIMIT", default_value_t = 64)]
    pub script_memory_limit: usize,

    /// Transaction store, `memory:` or `sled:<path>`
    #[arg(long, env = "REPLICANT_STORE", default_value = "memory:")]
    pub store: String,

    /// Run without a renderer; the automation driver is not registered
    #[arg(long, env = "REPLICANT_NO_RENDERER")]
    pub no_renderer: bool,
}

fn parse_interval(value: &str) -> Result<Duration, String> {
    if let Ok(seconds) = value.trim().parse::<u64>() {
        return Ok(Duration::from_secs(seconds));
    }
    parse_positive_duration(value).map_err(|e| e.to_string())
}

impl Config {
    /// Splits `--args` into the binary and its arguments
    pub fn renderer_args(&self) -> anyhow::Result<(String, Vec<String>)> {
        let mut parts = self.args.split_whitespace().map(str::to_string);
        let binary = parts.next().context("renderer args must start with the binary path")?;
        Ok((binary, parts.collect()))
    }

    /// Script memory limit in bytes
    pub fn script_memory_limit_bytes(&self) -> usize {
        self.script_memory_limit.saturating_mul(1024 * 1024)
    }

    pub fn renderer_settings(&self) -> RendererSettings {
        RendererSettings {
            recycle_interval: self.recycle_interval,
            drain_grace: self.drain_grace,
            health_attempts: self.health_attempts,
            ..RendererSettings::default()
        }
    }

    /// Default tracing filter when RUST_LOG is not set
    pub fn log_filter(&self) -> String {
        format!(
            "replicant_executor={level},replicant_lua={level},replicant_store={level},tower_http=debug",
            level = self.level
        )
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.recycle_interval.is_zero() {
            bail!("interval must be greater than 0");
        }

        if self.drain_grace >= self.recycle_interval {
            bail!(
                "drain grace ({:?}) must be shorter than the recycle interval ({:?})",
                self.drain_grace,
                self.recycle_interval
            );
        }

        if self.debugging_port == u16::MAX {
            bail!("debugging port must leave room for the alternate port");
        }

        if self.health_attempts == 0 {
            bail!("health_attempts must be greater than 0");
        }

        if self.script_memory_limit == 0 {
            bail!("script_memory_limit must be greater than 0");
        }

        if !LOG_LEVELS.contains(&self.level.to_lowercase().as_str()) {
            bail!(
                "unknown log level '{}', expected one of {}",
                self.level,
                LOG_LEVELS.join(", ")
            );
        }

        if !self.no_renderer {
            self.renderer_args()?;
        }

        Ok(())
    }
}
