use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(deserialize_with = "deserialize_log_level")]
    pub log_level: LogLevel,
    pub model: ModelConfig,
    pub labels: LabelsConfig,
    pub storage: StorageConfig,
    pub auth: AuthConfig,
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
    pub port: u16,
}

impl ServerConfig {
    pub fn get_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Error, Debug)]
pub enum ConfigValidationError {
    #[error("{kind} file not found: {path:?}")]
    MissingFile { kind: &'static str, path: PathBuf },
    #[error("invalid {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

pub trait Validatable {
    fn get_path(&self) -> PathBuf;
    fn validate(&self) -> Result<(), ConfigValidationError>;
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    pub onnx_file: String,
    pub model_dir: PathBuf,
    #[serde(default = "default_model_instances")]
    pub num_instances: usize,
    #[serde(default = "default_min_probability")]
    pub min_probability: f32,
    #[serde(default = "default_iou_threshold")]
    pub iou_threshold: f32,
    #[serde(default = "default_input_size")]
    pub input_size: u32,
}

fn default_model_instances() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn default_min_probability() -> f32 {
    0.25
}

fn default_iou_threshold() -> f32 {
    0.7
}

fn default_input_size() -> u32 {
    640
}

impl Validatable for ModelConfig {
    fn get_path(&self) -> PathBuf {
        self.model_dir.join(&self.onnx_file)
    }

    fn validate(&self) -> Result<(), ConfigValidationError> {
        if !self.get_path().exists() {
            return Err(ConfigValidationError::MissingFile {
                kind: "Model",
                path: self.get_path(),
            });
        }
        if self.num_instances == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "model.num_instances",
                reason: "at least one model instance is required".into(),
            });
        }
        if !(0.0..=1.0).contains(&self.min_probability) {
            return Err(ConfigValidationError::InvalidValue {
                field: "model.min_probability",
                reason: format!("{} is outside [0, 1]", self.min_probability),
            });
        }
        if !(0.0..=1.0).contains(&self.iou_threshold) {
            return Err(ConfigValidationError::InvalidValue {
                field: "model.iou_threshold",
                reason: format!("{} is outside [0, 1]", self.iou_threshold),
            });
        }
        if self.input_size == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "model.input_size",
                reason: "must be positive".into(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LabelsConfig {
    pub labels_file: String,
    pub labels_dir: PathBuf,
}

impl Validatable for LabelsConfig {
    fn get_path(&self) -> PathBuf {
        self.labels_dir.join(&self.labels_file)
    }

    fn validate(&self) -> Result<(), ConfigValidationError> {
        if !self.get_path().exists() {
            return Err(ConfigValidationError::MissingFile {
                kind: "Labels",
                path: self.get_path(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub media_dir: PathBuf,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

fn default_max_upload_bytes() -> usize {
    512 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub token_secret: String,
    #[serde(default = "default_token_ttl_secs")]
    pub token_ttl_secs: u64,
}

fn default_token_ttl_secs() -> u64 {
    3600
}

impl AuthConfig {
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.token_secret.len() < 16 {
            return Err(ConfigValidationError::InvalidValue {
                field: "auth.token_secret",
                reason: "must be at least 16 bytes".into(),
            });
        }
        if self.token_ttl_secs == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "auth.token_ttl_secs",
                reason: "must be positive".into(),
            });
        }
        Ok(())
    }
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

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
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
    let base_path = std::env::current_dir()
        .map_err(|e| config::ConfigError::Message(format!("no current directory: {}", e)))?;
    let configuration_directory = base_path.join("configuration");

    let environment: Environment = std::env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .try_into()
        .map_err(config::ConfigError::Message)?;

    let config = config::Config::builder()
        .add_source(config::File::from(
            configuration_directory.join("base.yaml"),
        ))
        .add_source(config::File::from(
            configuration_directory.join(format!("{}.yaml", environment.as_str())),
        ))
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    let config: Config = config.try_deserialize::<Config>()?;

    // Tracing is not initialized yet, so failures travel in the error.
    for result in [
        config.model.validate(),
        config.labels.validate(),
        config.auth.validate(),
    ] {
        result.map_err(|e| config::ConfigError::Message(e.to_string()))?;
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model_config(dir: &std::path::Path) -> ModelConfig {
        ModelConfig {
            onnx_file: "yolov8n.onnx".into(),
            model_dir: dir.to_path_buf(),
            num_instances: 2,
            min_probability: default_min_probability(),
            iou_threshold: default_iou_threshold(),
            input_size: default_input_size(),
        }
    }

    #[test]
    fn test_environment_parsing() {
        assert!(matches!(
            Environment::try_from("Production".to_string()),
            Ok(Environment::Production)
        ));
        assert!(Environment::try_from("staging".to_string()).is_err());
    }

    #[test]
    fn test_log_level_parsing() {
        assert_eq!(LogLevel::try_from("DEBUG".to_string()), Ok(LogLevel::Debug));
        assert!(LogLevel::try_from("trace".to_string()).is_err());
    }

    #[test]
    fn test_missing_model_file() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = model_config(dir.path());
        assert!(matches!(
            cfg.validate(),
            Err(ConfigValidationError::MissingFile { kind: "Model", .. })
        ));
    }

    #[test]
    fn test_model_thresholds_validated() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("yolov8n.onnx"), b"onnx").unwrap();

        let mut cfg = model_config(dir.path());
        assert!(cfg.validate().is_ok());

        cfg.min_probability = 1.5;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigValidationError::InvalidValue {
                field: "model.min_probability",
                ..
            })
        ));
    }

    #[test]
    fn test_auth_config_validated() {
        let mut auth = AuthConfig {
            token_secret: "short".into(),
            token_ttl_secs: default_token_ttl_secs(),
        };
        assert!(matches!(
            auth.validate(),
            Err(ConfigValidationError::InvalidValue {
                field: "auth.token_secret",
                ..
            })
        ));

        auth.token_secret = "a-long-enough-signing-secret".into();
        assert!(auth.validate().is_ok());
    }

    #[test]
    fn test_server_address() {
        let server = ServerConfig {
            host: "0.0.0.0".into(),
            port: 8000,
        };
        assert_eq!(server.get_address(), "0.0.0.0:8000");
    }
}
