use std::{fs, path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use client_core::ClientConfig;
use serde::Deserialize;
use shared::domain::{
    clamp_guidance_scale, SessionParameters, DEFAULT_GUIDANCE_SCALE, DEFAULT_SEED,
};

pub const DEFAULT_CONFIG_FILE: &str = "steer.toml";

#[derive(Parser, Debug, Default)]
#[command(name = "steer", about = "Steer a live image-to-image session from the terminal")]
pub struct Args {
    /// Coordinator base URL, e.g. http://127.0.0.1:7860
    #[arg(long)]
    pub server_url: Option<String>,
    #[arg(long)]
    pub prompt: Option<String>,
    #[arg(long)]
    pub seed: Option<u64>,
    #[arg(long)]
    pub guidance_scale: Option<f64>,
    #[arg(long)]
    pub snapshot_dir: Option<PathBuf>,
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub server_url: String,
    pub prompt: String,
    pub seed: u64,
    pub guidance_scale: f64,
    pub debounce_ms: u64,
    pub queue_poll_ms: u64,
    pub http_timeout_ms: u64,
    pub snapshot_dir: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:7860".into(),
            prompt: "a watercolor painting of a lighthouse".into(),
            seed: DEFAULT_SEED,
            guidance_scale: DEFAULT_GUIDANCE_SCALE,
            debounce_ms: 200,
            queue_poll_ms: 5000,
            http_timeout_ms: 10_000,
            snapshot_dir: PathBuf::from("snapshots"),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    server_url: Option<String>,
    prompt: Option<String>,
    seed: Option<u64>,
    guidance_scale: Option<f64>,
    debounce_ms: Option<u64>,
    queue_poll_ms: Option<u64>,
    http_timeout_ms: Option<u64>,
    snapshot_dir: Option<PathBuf>,
}

impl Settings {
    pub fn client_config(&self) -> Result<ClientConfig> {
        let mut config = ClientConfig::new(&self.server_url)
            .with_context(|| format!("invalid server url '{}'", self.server_url))?;
        config.debounce = Duration::from_millis(self.debounce_ms);
        config.queue_poll_period = Duration::from_millis(self.queue_poll_ms);
        config.http_timeout = Duration::from_millis(self.http_timeout_ms);
        config.validate().context("invalid timing settings")?;
        Ok(config)
    }

    pub fn initial_parameters(&self) -> Result<SessionParameters> {
        Ok(SessionParameters {
            prompt: self.prompt.clone(),
            seed: self.seed,
            guidance_scale: clamp_guidance_scale(self.guidance_scale)?,
        })
    }

    fn merge_file(&mut self, file: FileSettings) {
        if let Some(v) = file.server_url {
            self.server_url = v;
        }
        if let Some(v) = file.prompt {
            self.prompt = v;
        }
        if let Some(v) = file.seed {
            self.seed = v;
        }
        if let Some(v) = file.guidance_scale {
            self.guidance_scale = v;
        }
        if let Some(v) = file.debounce_ms {
            self.debounce_ms = v;
        }
        if let Some(v) = file.queue_poll_ms {
            self.queue_poll_ms = v;
        }
        if let Some(v) = file.http_timeout_ms {
            self.http_timeout_ms = v;
        }
        if let Some(v) = file.snapshot_dir {
            self.snapshot_dir = v;
        }
    }

    fn merge_env(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("STEER_SERVER_URL") {
            self.server_url = v;
        }
        if let Some(v) = env("APP__SERVER_URL") {
            self.server_url = v;
        }
        if let Some(v) = env("APP__PROMPT") {
            self.prompt = v;
        }
        if let Some(v) = env("APP__SEED").and_then(|v| v.parse().ok()) {
            self.seed = v;
        }
        if let Some(v) = env("APP__GUIDANCE_SCALE").and_then(|v| v.parse().ok()) {
            self.guidance_scale = v;
        }
        if let Some(v) = env("APP__DEBOUNCE_MS").and_then(|v| v.parse().ok()) {
            self.debounce_ms = v;
        }
        if let Some(v) = env("APP__QUEUE_POLL_MS").and_then(|v| v.parse().ok()) {
            self.queue_poll_ms = v;
        }
        if let Some(v) = env("APP__HTTP_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.http_timeout_ms = v;
        }
        if let Some(v) = env("APP__SNAPSHOT_DIR") {
            self.snapshot_dir = PathBuf::from(v);
        }
    }

    fn merge_args(&mut self, args: &Args) {
        if let Some(v) = &args.server_url {
            self.server_url = v.clone();
        }
        if let Some(v) = &args.prompt {
            self.prompt = v.clone();
        }
        if let Some(v) = args.seed {
            self.seed = v;
        }
        if let Some(v) = args.guidance_scale {
            self.guidance_scale = v;
        }
        if let Some(v) = &args.snapshot_dir {
            self.snapshot_dir = v.clone();
        }
    }
}

/// Defaults, then the config file, then the environment, then flags.
pub fn load_settings(args: &Args) -> Result<Settings> {
    load_settings_with(args, |key| std::env::var(key).ok())
}

pub fn load_settings_with(args: &Args, env: impl Fn(&str) -> Option<String>) -> Result<Settings> {
    let mut settings = Settings::default();

    match fs::read_to_string(&args.config) {
        Ok(raw) => {
            let file: FileSettings = toml::from_str(&raw)
                .with_context(|| format!("failed to parse {}", args.config.display()))?;
            settings.merge_file(file);
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read {}", args.config.display()))
        }
    }

    settings.merge_env(env);
    settings.merge_args(args);
    Ok(settings)
}
