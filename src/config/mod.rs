//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "facciata";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_CACHE_ROOT: &str = "pages";
const DEFAULT_ARTICLE_PREFIX: &str = "/post/";
const DEFAULT_ARTICLE_SUFFIX: &str = ".html";
const DEFAULT_ORIGIN_TIMEOUT_SECS: u64 = 10;
const DEFAULT_EXPORT_AGENT_TOKEN: &str = "static-export";
const DEFAULT_FORBIDDEN_EXTENSIONS: [&str; 2] = [".jsp", ".properties"];

/// Command-line arguments for the facciata binary.
#[derive(Debug, Parser)]
#[command(name = "facciata", version, about = "facciata front filter server")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "FACCIATA_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the front filter HTTP service.
    Serve(Box<ServeArgs>),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the static page storage root.
    #[arg(long = "cache-root-dir", value_name = "PATH")]
    pub cache_root_dir: Option<PathBuf>,

    /// Override the article page path prefix.
    #[arg(long = "cache-article-prefix", value_name = "PREFIX")]
    pub cache_article_prefix: Option<String>,

    /// Override the origin context path prepended to fetched URLs.
    #[arg(long = "origin-context-path", value_name = "PATH")]
    pub origin_context_path: Option<String>,

    /// Override the origin host (defaults to the inbound Host header).
    #[arg(long = "origin-host", value_name = "HOST")]
    pub origin_host: Option<String>,

    /// Override the origin fetch timeout.
    #[arg(long = "origin-timeout-seconds", value_name = "SECONDS")]
    pub origin_timeout_seconds: Option<u64>,
}

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub guard: GuardSettings,
    pub cache: CacheSettings,
    pub origin: OriginSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct GuardSettings {
    pub forbidden_extensions: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub root_dir: PathBuf,
    pub article_prefix: String,
    pub article_suffix: String,
}

#[derive(Debug, Clone)]
pub struct OriginSettings {
    pub context_path: String,
    pub host: Option<String>,
    pub timeout: Duration,
    pub export_agent_token: String,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("FACCIATA").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    guard: RawGuardSettings,
    cache: RawCacheSettings,
    origin: RawOriginSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(dir) = overrides.cache_root_dir.as_ref() {
            self.cache.root_dir = Some(dir.clone());
        }
        if let Some(prefix) = overrides.cache_article_prefix.as_ref() {
            self.cache.article_prefix = Some(prefix.clone());
        }
        if let Some(path) = overrides.origin_context_path.as_ref() {
            self.origin.context_path = Some(path.clone());
        }
        if let Some(host) = overrides.origin_host.as_ref() {
            self.origin.host = Some(host.clone());
        }
        if let Some(seconds) = overrides.origin_timeout_seconds {
            self.origin.timeout_seconds = Some(seconds);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            guard,
            cache,
            origin,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            guard: build_guard_settings(guard)?,
            cache: build_cache_settings(cache)?,
            origin: build_origin_settings(origin)?,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_guard_settings(guard: RawGuardSettings) -> Result<GuardSettings, LoadError> {
    let forbidden_extensions = guard.forbidden_extensions.unwrap_or_else(|| {
        DEFAULT_FORBIDDEN_EXTENSIONS
            .iter()
            .map(|ext| ext.to_string())
            .collect()
    });

    for extension in &forbidden_extensions {
        if !extension.starts_with('.') || extension.len() < 2 {
            return Err(LoadError::invalid(
                "guard.forbidden_extensions",
                format!("`{extension}` must be a dot-prefixed extension"),
            ));
        }
    }

    Ok(GuardSettings {
        forbidden_extensions,
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let root_dir = cache
        .root_dir
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_ROOT));
    if root_dir.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "cache.root_dir",
            "path must not be empty",
        ));
    }

    let article_prefix = cache
        .article_prefix
        .unwrap_or_else(|| DEFAULT_ARTICLE_PREFIX.to_string());
    if !article_prefix.starts_with('/') {
        return Err(LoadError::invalid(
            "cache.article_prefix",
            "prefix must start with `/`",
        ));
    }

    let article_suffix = cache
        .article_suffix
        .unwrap_or_else(|| DEFAULT_ARTICLE_SUFFIX.to_string());
    if !article_suffix.starts_with('.') || article_suffix.len() < 2 {
        return Err(LoadError::invalid(
            "cache.article_suffix",
            "suffix must be a dot-prefixed extension",
        ));
    }

    Ok(CacheSettings {
        root_dir,
        article_prefix,
        article_suffix,
    })
}

fn build_origin_settings(origin: RawOriginSettings) -> Result<OriginSettings, LoadError> {
    let context_path = origin.context_path.unwrap_or_default();
    if !context_path.is_empty() && (!context_path.starts_with('/') || context_path.ends_with('/')) {
        return Err(LoadError::invalid(
            "origin.context_path",
            "must be empty or start with `/` and carry no trailing slash",
        ));
    }

    let host = origin.host.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });

    let timeout_seconds = origin
        .timeout_seconds
        .unwrap_or(DEFAULT_ORIGIN_TIMEOUT_SECS);
    if timeout_seconds == 0 {
        return Err(LoadError::invalid(
            "origin.timeout_seconds",
            "must be greater than zero",
        ));
    }

    let export_agent_token = origin
        .export_agent_token
        .unwrap_or_else(|| DEFAULT_EXPORT_AGENT_TOKEN.to_string());
    if export_agent_token.trim().is_empty() {
        return Err(LoadError::invalid(
            "origin.export_agent_token",
            "token must not be blank",
        ));
    }

    Ok(OriginSettings {
        context_path,
        host,
        timeout: Duration::from_secs(timeout_seconds),
        export_agent_token,
    })
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    format!("{host}:{port}")
        .parse()
        .map_err(|err| format!("failed to parse `{host}:{port}`: {err}"))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawGuardSettings {
    forbidden_extensions: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    root_dir: Option<PathBuf>,
    article_prefix: Option<String>,
    article_suffix: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawOriginSettings {
    context_path: Option<String>,
    host: Option<String>,
    timeout_seconds: Option<u64>,
    export_agent_token: Option<String>,
}

#[cfg(test)]
mod tests;
