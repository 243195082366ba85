use anyhow::{Context, Result};
use clap::Parser;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_HTTP_BIND: &str = "127.0.0.1:8000";
const DEFAULT_EXTENSIONS: &[&str] = &["xlsx", "xlsm"];
const DEFAULT_MAX_UPLOAD_BYTES: u64 = 50 * 1024 * 1024;
const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 7_200;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;
const DEFAULT_MODEL_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_STREAM_PACE_MS: u64 = 10;
const DEFAULT_MODEL_CANDIDATES: &[&str] =
    &["gemini-1.5-flash", "gemini-1.5-pro", "gemini-pro"];

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub http_bind_address: SocketAddr,
    pub temp_root: PathBuf,
    pub allowed_extensions: Vec<String>,
    pub max_upload_bytes: u64,
    pub session_timeout: Duration,
    pub sweep_interval: Duration,
    pub api_key: String,
    pub model_candidates: Vec<String>,
    pub model_timeout: Duration,
    pub stream_pace: Duration,
}

impl ServerConfig {
    pub fn from_args(args: CliArgs) -> Result<Self> {
        let CliArgs {
            config,
            http_bind: cli_http_bind,
            temp_root: cli_temp_root,
            extensions: cli_extensions,
            max_upload_bytes: cli_max_upload_bytes,
            session_timeout_secs: cli_session_timeout_secs,
            sweep_interval_secs: cli_sweep_interval_secs,
            api_key,
            models: cli_models,
            model_timeout_ms: cli_model_timeout_ms,
            stream_pace_ms: cli_stream_pace_ms,
        } = args;

        let file_config = if let Some(path) = config.as_ref() {
            load_config_file(path)?
        } else {
            PartialConfig::default()
        };

        let http_bind_address = cli_http_bind.or(file_config.http_bind).unwrap_or_else(|| {
            DEFAULT_HTTP_BIND
                .parse()
                .expect("default bind address valid")
        });

        let temp_root = cli_temp_root
            .or(file_config.temp_root)
            .unwrap_or_else(std::env::temp_dir);

        let mut allowed_extensions = cli_extensions
            .or(file_config.extensions)
            .unwrap_or_else(|| {
                DEFAULT_EXTENSIONS
                    .iter()
                    .map(|ext| (*ext).to_string())
                    .collect()
            })
            .into_iter()
            .map(|ext| ext.trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect::<Vec<_>>();
        allowed_extensions.sort();
        allowed_extensions.dedup();
        anyhow::ensure!(
            !allowed_extensions.is_empty(),
            "at least one file extension must be provided"
        );

        let max_upload_bytes = cli_max_upload_bytes
            .or(file_config.max_upload_bytes)
            .unwrap_or(DEFAULT_MAX_UPLOAD_BYTES);
        anyhow::ensure!(max_upload_bytes > 0, "max upload size must be positive");

        let session_timeout_secs = cli_session_timeout_secs
            .or(file_config.session_timeout_secs)
            .unwrap_or(DEFAULT_SESSION_TIMEOUT_SECS)
            .max(1);

        let sweep_interval_secs = cli_sweep_interval_secs
            .or(file_config.sweep_interval_secs)
            .unwrap_or(DEFAULT_SWEEP_INTERVAL_SECS)
            .max(1);

        let api_key = api_key.trim().to_string();
        anyhow::ensure!(
            !api_key.is_empty(),
            "missing Gemini API key: set GEMINI_API_KEY or pass --api-key"
        );

        let model_candidates = cli_models
            .or(file_config.models)
            .unwrap_or_else(|| {
                DEFAULT_MODEL_CANDIDATES
                    .iter()
                    .map(|m| (*m).to_string())
                    .collect()
            })
            .into_iter()
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .collect::<Vec<_>>();
        anyhow::ensure!(
            !model_candidates.is_empty(),
            "at least one candidate model must be provided"
        );

        let model_timeout_ms = cli_model_timeout_ms
            .or(file_config.model_timeout_ms)
            .unwrap_or(DEFAULT_MODEL_TIMEOUT_MS)
            .max(1);

        let stream_pace_ms = cli_stream_pace_ms
            .or(file_config.stream_pace_ms)
            .unwrap_or(DEFAULT_STREAM_PACE_MS);

        Ok(Self {
            http_bind_address,
            temp_root,
            allowed_extensions,
            max_upload_bytes,
            session_timeout: Duration::from_secs(session_timeout_secs),
            sweep_interval: Duration::from_secs(sweep_interval_secs),
            api_key,
            model_candidates,
            model_timeout: Duration::from_millis(model_timeout_ms),
            stream_pace: Duration::from_millis(stream_pace_ms),
        })
    }

    pub fn is_extension_allowed(&self, filename: &str) -> bool {
        Path::new(filename)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .map(|ext| self.allowed_extensions.contains(&ext))
            .unwrap_or(false)
    }

    pub fn ensure_temp_root(&self) -> Result<()> {
        fs::create_dir_all(&self.temp_root)
            .with_context(|| format!("failed to create temp root {:?}", self.temp_root))?;
        Ok(())
    }
}

#[derive(Parser, Debug, Default, Clone)]
#[command(
    name = "spreadsheet-agent",
    about = "Conversational spreadsheet analysis and editing server",
    version
)]
pub struct CliArgs {
    #[arg(
        long,
        value_name = "FILE",
        help = "Path to a configuration file (YAML or JSON)"
    )]
    pub config: Option<PathBuf>,

    #[arg(
        long,
        env = "SPREADSHEET_AGENT_HTTP_BIND",
        value_name = "ADDR",
        help = "HTTP bind address"
    )]
    pub http_bind: Option<SocketAddr>,

    #[arg(
        long,
        env = "SPREADSHEET_AGENT_TEMP_ROOT",
        value_name = "DIR",
        help = "Directory under which per-session upload directories are created"
    )]
    pub temp_root: Option<PathBuf>,

    #[arg(
        long,
        env = "SPREADSHEET_AGENT_EXTENSIONS",
        value_name = "EXT",
        value_delimiter = ',',
        help = "Comma-separated list of allowed upload extensions"
    )]
    pub extensions: Option<Vec<String>>,

    #[arg(
        long,
        env = "SPREADSHEET_AGENT_MAX_UPLOAD_BYTES",
        value_name = "BYTES",
        help = "Max upload size in bytes (default: 52428800)",
        value_parser = clap::value_parser!(u64)
    )]
    pub max_upload_bytes: Option<u64>,

    #[arg(
        long,
        env = "SPREADSHEET_AGENT_SESSION_TIMEOUT_SECS",
        value_name = "SECS",
        help = "Idle session lifetime in seconds (default: 7200)",
        value_parser = clap::value_parser!(u64)
    )]
    pub session_timeout_secs: Option<u64>,

    #[arg(
        long,
        env = "SPREADSHEET_AGENT_SWEEP_INTERVAL_SECS",
        value_name = "SECS",
        help = "Cleanup sweep interval in seconds (default: 60)",
        value_parser = clap::value_parser!(u64)
    )]
    pub sweep_interval_secs: Option<u64>,

    #[arg(
        long,
        env = "GEMINI_API_KEY",
        value_name = "KEY",
        hide_env_values = true,
        default_value = "",
        help = "Gemini API key (required)"
    )]
    pub api_key: String,

    #[arg(
        long,
        env = "SPREADSHEET_AGENT_MODELS",
        value_name = "MODEL",
        value_delimiter = ',',
        help = "Candidate model names, probed in order at startup"
    )]
    pub models: Option<Vec<String>>,

    #[arg(
        long,
        env = "SPREADSHEET_AGENT_MODEL_TIMEOUT_MS",
        value_name = "MS",
        help = "Per-request model call timeout in milliseconds (default: 30000)",
        value_parser = clap::value_parser!(u64)
    )]
    pub model_timeout_ms: Option<u64>,

    #[arg(
        long,
        env = "SPREADSHEET_AGENT_STREAM_PACE_MS",
        value_name = "MS",
        help = "Delay between streamed chat chunks in milliseconds (default: 10)",
        value_parser = clap::value_parser!(u64)
    )]
    pub stream_pace_ms: Option<u64>,
}

#[derive(Debug, Default, serde::Deserialize)]
struct PartialConfig {
    http_bind: Option<SocketAddr>,
    temp_root: Option<PathBuf>,
    extensions: Option<Vec<String>>,
    max_upload_bytes: Option<u64>,
    session_timeout_secs: Option<u64>,
    sweep_interval_secs: Option<u64>,
    models: Option<Vec<String>>,
    model_timeout_ms: Option<u64>,
    stream_pace_ms: Option<u64>,
}

fn load_config_file(path: &Path) -> Result<PartialConfig> {
    if !path.exists() {
        anyhow::bail!("config file {:?} does not exist", path);
    }
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {:?}", path))?;
    let ext = path
        .extension()
        .and_then(|os| os.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let parsed = match ext.as_str() {
        "yaml" | "yml" => serde_yaml::from_str(&contents)
            .with_context(|| format!("failed to parse YAML config {:?}", path))?,
        "json" => serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse JSON config {:?}", path))?,
        other => anyhow::bail!("unsupported config extension: {other}"),
    };
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_args() -> CliArgs {
        CliArgs {
            api_key: "test-key".to_string(),
            ..CliArgs::default()
        }
    }

    #[test]
    fn defaults_apply() {
        let config = ServerConfig::from_args(base_args()).unwrap();
        assert_eq!(config.allowed_extensions, vec!["xlsm", "xlsx"]);
        assert_eq!(config.max_upload_bytes, 50 * 1024 * 1024);
        assert_eq!(config.session_timeout, Duration::from_secs(7_200));
        assert_eq!(config.model_candidates[0], "gemini-1.5-flash");
    }

    #[test]
    fn missing_api_key_is_fatal() {
        let args = CliArgs::default();
        assert!(ServerConfig::from_args(args).is_err());
    }

    #[test]
    fn extension_check_is_case_insensitive() {
        let config = ServerConfig::from_args(base_args()).unwrap();
        assert!(config.is_extension_allowed("Report.XLSX"));
        assert!(config.is_extension_allowed("macros.xlsm"));
        assert!(!config.is_extension_allowed("data.csv"));
        assert!(!config.is_extension_allowed("no_extension"));
    }
}
