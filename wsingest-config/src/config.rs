use std::env;
use std::error::Error;
use std::fmt;
use std::fs;
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;
use wsingest_log::{Level, LogConfig};
use wsingest_metrics::DataFormat;

use crate::{OverridableConfig, ServiceAddress};

/// The default path accepting WebSocket upgrades in server mode.
pub const DEFAULT_PATH: &str = "/watch";

/// The default time to wait for the ingestion task on shutdown, in seconds.
const DEFAULT_SHUTDOWN_TIMEOUT: u64 = 5;

/// A commented configuration file with all default values.
pub const SAMPLE_CONFIG: &str = r#"# Configuration of the wsingest WebSocket input.
input:
  ## Either "client" to dial a WebSocket server, or "server" to accept a single
  ## WebSocket peer. Defaults to "client" if a url is set, otherwise "server".
  # mode: server

  ## The WebSocket URL to dial in client mode.
  # url: ws://localhost:3210/telegraf

  ## Address and port to listen on in server mode. ":3210" listens on all
  ## interfaces.
  service_address: ":3210"

  ## The HTTP path accepting the WebSocket upgrade in server mode.
  path: /watch

  ## The format of incoming messages, either "influx" or "json".
  data_format: influx

  ## Seconds to wait for the ingestion task to finish when stopping.
  shutdown_timeout: 5

logging:
  ## One of "error", "warn", "info", "debug", "trace" or "off".
  level: info
  ## One of "auto", "pretty", "simplified" or "json".
  format: auto
"#;

/// Defines the source of a config error.
#[derive(Debug, Default)]
enum ConfigErrorSource {
    /// An error occurring independently.
    #[default]
    None,
    /// An error originating from a configuration file.
    File(PathBuf),
    /// An error originating in a field override (an env var, or a CLI parameter).
    FieldOverride(String),
}

impl fmt::Display for ConfigErrorSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigErrorSource::None => Ok(()),
            ConfigErrorSource::File(file_name) => {
                write!(f, " (file {})", file_name.display())
            }
            ConfigErrorSource::FieldOverride(name) => write!(f, " (field {name})"),
        }
    }
}

/// Indicates config related errors.
#[derive(Debug)]
pub struct ConfigError {
    source: ConfigErrorSource,
    kind: ConfigErrorKind,
    inner: Option<Box<dyn Error + Send + Sync + 'static>>,
}

impl ConfigError {
    #[inline]
    fn new(kind: ConfigErrorKind) -> Self {
        Self {
            source: ConfigErrorSource::None,
            kind,
            inner: None,
        }
    }

    #[inline]
    fn wrap<E>(inner: E, kind: ConfigErrorKind) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self {
            inner: Some(Box::new(inner)),
            ..Self::new(kind)
        }
    }

    #[inline]
    fn for_field<E>(inner: E, field: &'static str) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self::wrap(inner, ConfigErrorKind::InvalidValue).field(field)
    }

    #[inline]
    fn file(mut self, p: impl AsRef<Path>) -> Self {
        self.source = ConfigErrorSource::File(p.as_ref().to_path_buf());
        self
    }

    #[inline]
    fn field(mut self, name: &'static str) -> Self {
        self.source = ConfigErrorSource::FieldOverride(name.to_owned());
        self
    }

    /// Returns the error kind of the error.
    pub fn kind(&self) -> ConfigErrorKind {
        self.kind
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.kind, self.source)
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.inner.as_ref().map(|e| e.as_ref() as &(dyn Error + 'static))
    }
}

/// Indicates config related errors.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, thiserror::Error)]
pub enum ConfigErrorKind {
    /// Failed to open the file.
    #[error("could not open config file")]
    CouldNotOpenFile,
    /// Failed to save a file.
    #[error("could not write config file")]
    CouldNotWriteFile,
    /// Parsing YAML failed.
    #[error("could not parse yaml config file")]
    BadYaml,
    /// Invalid config value.
    #[error("invalid config value")]
    InvalidValue,
}

trait ConfigObject: DeserializeOwned + Serialize {
    /// The basename of the config file.
    fn name() -> &'static str;

    /// The full filename of the config file, including the file extension.
    fn path(base: &Path) -> PathBuf {
        base.join(format!("{}.yml", Self::name()))
    }

    /// Loads the config file from a file within the given directory location.
    fn load(base: &Path) -> Result<Self, ConfigError> {
        let path = Self::path(base);

        let f = fs::File::open(&path)
            .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::CouldNotOpenFile).file(&path))?;

        serde_yaml::from_reader(io::BufReader::new(f))
            .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::BadYaml).file(&path))
    }
}

/// The role of the input on the WebSocket connection.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InputMode {
    /// Dials the configured URL.
    Client,
    /// Listens on the service address and accepts a single peer.
    Server,
}

impl fmt::Display for InputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputMode::Client => f.write_str("client"),
            InputMode::Server => f.write_str("server"),
        }
    }
}

/// An error returned when parsing an [`InputMode`] from a string fails.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("invalid input mode `{0}`, expected `client` or `server`")]
pub struct ParseInputModeError(String);

impl FromStr for InputMode {
    type Err = ParseInputModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "client" => Ok(InputMode::Client),
            "server" => Ok(InputMode::Server),
            _ => Err(ParseInputModeError(s.to_owned())),
        }
    }
}

/// An error returned when a WebSocket URL has the wrong scheme.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unsupported url scheme `{0}`, expected `ws` or `wss`")]
pub struct UnsupportedSchemeError(String);

/// An error returned when the upgrade path does not start with a slash.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("path `{0}` must start with `/`")]
pub struct InvalidPathError(String);

/// Controls the WebSocket input.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Input {
    /// Explicit operation mode. Inferred from `url` if not set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<InputMode>,
    /// The WebSocket URL to dial in client mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<Url>,
    /// The address to listen on in server mode.
    pub service_address: ServiceAddress,
    /// The HTTP path accepting upgrades in server mode.
    pub path: String,
    /// The format of incoming messages.
    pub data_format: DataFormat,
    /// Seconds to wait for the ingestion task when stopping.
    pub shutdown_timeout: u64,
}

impl Default for Input {
    fn default() -> Self {
        Input {
            mode: None,
            url: None,
            service_address: ServiceAddress::default(),
            path: DEFAULT_PATH.to_owned(),
            data_format: DataFormat::default(),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
struct ConfigValues {
    input: Input,
    logging: LogConfig,
}

impl ConfigObject for ConfigValues {
    fn name() -> &'static str {
        "config"
    }
}

/// Config struct.
#[derive(Clone, Default)]
pub struct Config {
    values: ConfigValues,
    path: PathBuf,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("path", &self.path)
            .field("values", &self.values)
            .finish()
    }
}

impl Config {
    /// Loads a config from a given config folder.
    ///
    /// If the folder does not contain a `config.yml`, all values are defaulted.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
        let path = env::current_dir()
            .map(|x| x.join(path.as_ref()))
            .unwrap_or_else(|_| path.as_ref().to_path_buf());

        let values = if ConfigValues::path(&path).exists() {
            ConfigValues::load(&path)?
        } else {
            ConfigValues::default()
        };

        Ok(Config { values, path })
    }

    /// Creates a config from a YAML string.
    ///
    /// This is mostly useful for tests.
    pub fn from_yaml_str(yaml: &str) -> Result<Config, ConfigError> {
        Ok(Config {
            values: serde_yaml::from_str(yaml)
                .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::BadYaml))?,
            path: PathBuf::new(),
        })
    }

    /// Override configuration with values coming from other sources (e.g. env variables or
    /// command line parameters).
    pub fn apply_override(
        &mut self,
        overrides: OverridableConfig,
    ) -> Result<&mut Self, ConfigError> {
        let input = &mut self.values.input;

        if let Some(mode) = overrides.mode {
            input.mode = Some(
                mode.parse::<InputMode>()
                    .map_err(|err| ConfigError::for_field(err, "mode"))?,
            );
        }

        if let Some(url) = overrides.url {
            input.url = Some(
                url.parse::<Url>()
                    .map_err(|err| ConfigError::for_field(err, "url"))?,
            );
        }

        if let Some(service_address) = overrides.service_address {
            input.service_address = service_address
                .parse::<ServiceAddress>()
                .map_err(|err| ConfigError::for_field(err, "service_address"))?;
        }

        if let Some(path) = overrides.path {
            input.path = path;
        }

        if let Some(data_format) = overrides.data_format {
            input.data_format = data_format
                .parse::<DataFormat>()
                .map_err(|err| ConfigError::for_field(err, "data_format"))?;
        }

        if let Some(level) = overrides.log_level {
            self.values.logging.level = level
                .parse::<Level>()
                .map_err(|err| ConfigError::for_field(err, "log_level"))?;
        }

        Ok(self)
    }

    /// Checks if the config is already initialized.
    pub fn config_exists<P: AsRef<Path>>(path: P) -> bool {
        fs::metadata(ConfigValues::path(path.as_ref())).is_ok()
    }

    /// Writes [`SAMPLE_CONFIG`] into the given config folder, creating it if necessary.
    ///
    /// Returns the path of the written file.
    pub fn init_path<P: AsRef<Path>>(path: P) -> Result<PathBuf, ConfigError> {
        let path = path.as_ref();
        let file = ConfigValues::path(path);

        fs::create_dir_all(path)
            .and_then(|_| fs::write(&file, SAMPLE_CONFIG))
            .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::CouldNotWriteFile).file(&file))?;

        Ok(file)
    }

    /// Returns the path of the config folder.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Dumps out a YAML string of the values.
    pub fn to_yaml_string(&self) -> Result<String, ConfigError> {
        serde_yaml::to_string(&self.values)
            .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::CouldNotWriteFile))
    }

    /// Validates that the input section describes a usable connection target.
    ///
    /// Client mode requires a `ws://` or `wss://` URL. Server mode requires an upgrade path
    /// starting with `/` and a resolvable service address.
    pub fn validate_input(&self) -> Result<(), ConfigError> {
        match self.input_mode() {
            InputMode::Client => self.client_url().map(|_| ()),
            InputMode::Server => {
                let path = self.upgrade_path();
                if !path.starts_with('/') {
                    return Err(ConfigError::for_field(
                        InvalidPathError(path.to_owned()),
                        "path",
                    ));
                }
                self.listen_addr().map(|_| ())
            }
        }
    }

    /// Returns the input section.
    pub fn input(&self) -> &Input {
        &self.values.input
    }

    /// Returns the operation mode of the input.
    ///
    /// Without an explicit mode, the input is a client if a URL is configured.
    pub fn input_mode(&self) -> InputMode {
        let input = &self.values.input;
        match (input.mode, &input.url) {
            (Some(mode), _) => mode,
            (None, Some(_)) => InputMode::Client,
            (None, None) => InputMode::Server,
        }
    }

    /// Returns the URL to dial in client mode.
    pub fn client_url(&self) -> Result<&Url, ConfigError> {
        let url = self
            .values
            .input
            .url
            .as_ref()
            .ok_or_else(|| ConfigError::new(ConfigErrorKind::InvalidValue).field("url"))?;

        match url.scheme() {
            "ws" | "wss" => Ok(url),
            other => Err(ConfigError::for_field(
                UnsupportedSchemeError(other.to_owned()),
                "url",
            )),
        }
    }

    /// Returns the resolved socket address to listen on in server mode.
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.values
            .input
            .service_address
            .socket_addr()
            .map_err(|e| ConfigError::for_field(e, "service_address"))
    }

    /// Returns the HTTP path accepting upgrades in server mode.
    pub fn upgrade_path(&self) -> &str {
        &self.values.input.path
    }

    /// Returns the format of incoming messages.
    pub fn data_format(&self) -> DataFormat {
        self.values.input.data_format
    }

    /// Returns the time to wait for the ingestion task when stopping.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.values.input.shutdown_timeout)
    }

    /// Returns the logging configuration.
    pub fn logging(&self) -> &LogConfig {
        &self.values.logging
    }
}
