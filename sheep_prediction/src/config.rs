use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(deserialize_with = "deserialize_log_level")]
    pub log_level: LogLevel,
    pub model: ModelConfig,
    #[serde(default)]
    pub prediction: PredictionConfig,
}

fn deserialize_log_level<'de, D>(deserializer: D) -> Result<LogLevel, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.try_into().map_err(serde::de::Error::custom)
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
    #[serde(default = "default_cors_origin")]
    pub cors_origin: String,
}

fn default_port() -> u16 {
    8008
}

fn default_max_upload_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_cors_origin() -> String {
    "*".to_string()
}

impl ServerConfig {
    pub fn get_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ModelBackend {
    Safetensors,
    Onnx,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Architecture {
    Resnet18,
    Resnet34,
}

impl Architecture {
    pub fn as_str(&self) -> &'static str {
        match self {
            Architecture::Resnet18 => "resnet18",
            Architecture::Resnet34 => "resnet34",
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    #[serde(default = "default_backend")]
    pub backend: ModelBackend,
    pub weights_file: String,
    pub model_dir: PathBuf,
    #[serde(default = "default_architecture")]
    pub architecture: Architecture,
    #[serde(default)]
    pub use_cuda: bool,
    #[serde(default = "default_model_instances")]
    pub num_instances: usize,
    /// Fallback when the weights file does not name its targets.
    #[serde(default)]
    pub target_names: Option<Vec<String>>,
    #[serde(default)]
    pub key_remap: KeyRemapConfig,
}

fn default_backend() -> ModelBackend {
    ModelBackend::Safetensors
}

fn default_architecture() -> Architecture {
    Architecture::Resnet18
}

fn default_model_instances() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

impl ModelConfig {
    pub fn get_path(&self) -> PathBuf {
        self.model_dir.join(&self.weights_file)
    }
}

/// Rules turning stored parameter names into the names the runtime model uses.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct KeyRemapConfig {
    #[serde(default = "default_strip_prefixes")]
    pub strip_prefixes: Vec<String>,
    #[serde(default = "default_drop_prefixes")]
    pub drop_prefixes: Vec<String>,
    #[serde(default = "default_drop_suffixes")]
    pub drop_suffixes: Vec<String>,
}

fn default_strip_prefixes() -> Vec<String> {
    vec!["cnn.".to_string(), "module.".to_string()]
}

fn default_drop_prefixes() -> Vec<String> {
    vec!["tab_mlp".to_string(), "final_head".to_string()]
}

fn default_drop_suffixes() -> Vec<String> {
    vec!["num_batches_tracked".to_string()]
}

impl Default for KeyRemapConfig {
    fn default() -> Self {
        Self {
            strip_prefixes: default_strip_prefixes(),
            drop_prefixes: default_drop_prefixes(),
            drop_suffixes: default_drop_suffixes(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct PredictionConfig {
    /// Reported when the model has no confidence output. Omitted when unset.
    #[serde(default)]
    pub confidence_placeholder: Option<f32>,
}

#[derive(Debug, Deserialize, Clone)]
pub enum Environment {
    Local,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Production => "production",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "production" => Ok(Self::Production),
            other => Err(format!(
                "{} is not a supported environment. Use either `local` or `production`.",
                other
            )),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub enum LogLevel {
    Debug,
    Info,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
        }
    }
}

impl TryFrom<String> for LogLevel {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            other => Err(format!(
                "{} is not a supported minimum log level. Use either `debug` or `info`.",
                other
            )),
        }
    }
}

pub fn get_configuration() -> Result<Config, config::ConfigError> {
    let base_path = std::env::current_dir().map_err(|e| {
        config::ConfigError::Message(format!("Failed to determine the current directory: {}", e))
    })?;
    let environment: Environment = std::env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .try_into()
        .map_err(config::ConfigError::Message)?;

    load_configuration(&base_path.join("configuration"), &environment)
}

pub fn load_configuration(
    configuration_directory: &Path,
    environment: &Environment,
) -> Result<Config, config::ConfigError> {
    let config = config::Config::builder()
        .add_source(config::File::from(
            configuration_directory.join("base.yaml"),
        ))
        .add_source(
            config::File::from(
                configuration_directory.join(format!("{}.yaml", environment.as_str())),
            )
            .required(false),
        )
        .add_source(
            config::Environment::with_prefix("SHEEP")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    config.try_deserialize::<Config>()
}
