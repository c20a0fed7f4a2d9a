//! Detection service configuration
//!
//! Values come from an optional TOML file and are then overridden by
//! environment variables.

use std::io::ErrorKind;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub model: ModelConfig,
    pub inference: InferenceConfig,
    pub catalog: CatalogConfig,
    pub log_level: String,
    pub debug: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub grpc_port: u16,
    /// 0 disables the REST listener.
    pub rest_port: u16,
    pub max_workers: usize,
    pub shutdown_grace_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub model_dir: PathBuf,
    pub model_name: String,
    /// Seconds between model file checks.
    pub watch_interval: f64,
    pub default_confidence: f32,
    pub default_iou: f32,
    pub input_size: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    pub device: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub grpc_address: String,
    /// Seconds between class syncs, driven by the catalog side.
    pub sync_interval: f64,
}

impl ServerConfig {
    pub fn grpc_address(&self) -> String {
        format!("{}:{}", self.host, self.grpc_port)
    }

    pub fn rest_address(&self) -> Option<String> {
        (self.rest_port != 0).then(|| format!("{}:{}", self.host, self.rest_port))
    }
}

impl ModelConfig {
    pub fn model_path(&self) -> PathBuf {
        self.model_dir.join(&self.model_name)
    }

    /// Polling period of the model watcher.
    pub fn watch_interval(&self) -> anyhow::Result<Duration> {
        if !(self.watch_interval > 0.0) {
            anyhow::bail!("MODEL_WATCH_INTERVAL must be positive");
        }
        Duration::try_from_secs_f64(self.watch_interval)
            .with_context(|| format!("invalid value for MODEL_WATCH_INTERVAL: {}", self.watch_interval))
    }
}

impl Config {
    /// Read a TOML config file. A missing file yields `None`; unreadable or
    /// malformed files are errors.
    pub fn load_optional(path: &str) -> anyhow::Result<Option<Self>> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("failed to read config {}", path)),
        };
        let config: Config =
            toml::from_str(&content).with_context(|| format!("invalid config file {}", path))?;
        Ok(Some(config))
    }

    pub fn default_path() -> String {
        std::env::var("DETECTOR_CONFIG").unwrap_or_else(|_| "config.toml".to_string())
    }

    /// Apply environment overrides on top of `self`.
    pub fn with_env(self) -> anyhow::Result<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup. Missing keys keep the
    /// current value; present but unparseable keys are an error.
    pub fn with_overrides<F>(mut self, lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: FromStr>(
            lookup: &dyn Fn(&str) -> Option<String>,
            key: &str,
            target: &mut T,
        ) -> anyhow::Result<()>
        where
            T::Err: std::error::Error + Send + Sync + 'static,
        {
            if let Some(raw) = lookup(key) {
                *target = raw
                    .trim()
                    .parse()
                    .with_context(|| format!("invalid value for {key}: {raw:?}"))?;
            }
            Ok(())
        }

        let lookup: &dyn Fn(&str) -> Option<String> = &lookup;

        parse(lookup, "GRPC_HOST", &mut self.server.host)?;
        parse(lookup, "GRPC_PORT", &mut self.server.grpc_port)?;
        parse(lookup, "GRPC_MAX_WORKERS", &mut self.server.max_workers)?;
        parse(lookup, "REST_PORT", &mut self.server.rest_port)?;
        parse(lookup, "SHUTDOWN_GRACE_SECS", &mut self.server.shutdown_grace_secs)?;

        parse(lookup, "MODEL_DIR", &mut self.model.model_dir)?;
        parse(lookup, "MODEL_NAME", &mut self.model.model_name)?;
        parse(lookup, "MODEL_WATCH_INTERVAL", &mut self.model.watch_interval)?;
        parse(lookup, "DEFAULT_CONFIDENCE", &mut self.model.default_confidence)?;
        parse(lookup, "DEFAULT_IOU", &mut self.model.default_iou)?;
        parse(lookup, "INPUT_SIZE", &mut self.model.input_size)?;

        parse(lookup, "INFERENCE_DEVICE", &mut self.inference.device)?;

        parse(lookup, "CATALOG_GRPC_ADDRESS", &mut self.catalog.grpc_address)?;
        parse(lookup, "CLASS_SYNC_INTERVAL", &mut self.catalog.sync_interval)?;

        parse(lookup, "LOG_LEVEL", &mut self.log_level)?;
        if let Some(raw) = lookup("DEBUG") {
            self.debug = raw.trim().eq_ignore_ascii_case("true");
        }

        if self.server.max_workers == 0 {
            anyhow::bail!("GRPC_MAX_WORKERS must be at least 1");
        }
        self.model.watch_interval()?;
        if self.model.input_size == 0 {
            anyhow::bail!("INPUT_SIZE must be positive");
        }

        Ok(self)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            model: ModelConfig::default(),
            inference: InferenceConfig::default(),
            catalog: CatalogConfig::default(),
            log_level: "INFO".to_string(),
            debug: false,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            grpc_port: 50051,
            rest_port: 0,
            max_workers: 10,
            shutdown_grace_secs: 5,
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("models"),
            model_name: "best.onnx".to_string(),
            watch_interval: 5.0,
            default_confidence: 0.5,
            default_iou: 0.45,
            input_size: 640,
        }
    }
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            device: "CPU".to_string(),
        }
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            grpc_address: "localhost:8081".to_string(),
            sync_interval: 300.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_overrides() {
        let config = Config::default().with_overrides(lookup(&[])).unwrap();
        assert_eq!(config.server.grpc_address(), "0.0.0.0:50051");
        assert_eq!(config.server.rest_address(), None);
        assert_eq!(config.model.model_path(), PathBuf::from("models/best.onnx"));
        assert_eq!(config.model.input_size, 640);
    }

    #[test]
    fn test_env_overrides() {
        let config = Config::default()
            .with_overrides(lookup(&[
                ("GRPC_PORT", "6000"),
                ("REST_PORT", "8080"),
                ("MODEL_DIR", "/srv/models"),
                ("MODEL_NAME", "shelf.onnx"),
                ("MODEL_WATCH_INTERVAL", "0.5"),
                ("DEFAULT_CONFIDENCE", "0.3"),
                ("DEBUG", "TRUE"),
            ]))
            .unwrap();

        assert_eq!(config.server.grpc_port, 6000);
        assert_eq!(config.server.rest_address().as_deref(), Some("0.0.0.0:8080"));
        assert_eq!(config.model.model_path(), PathBuf::from("/srv/models/shelf.onnx"));
        assert!((config.model.watch_interval - 0.5).abs() < f64::EPSILON);
        assert!((config.model.default_confidence - 0.3).abs() < f32::EPSILON);
        assert!(config.debug);
    }

    #[test]
    fn test_invalid_override_names_variable() {
        let err = Config::default()
            .with_overrides(lookup(&[("GRPC_PORT", "not-a-port")]))
            .unwrap_err();
        assert!(err.to_string().contains("GRPC_PORT"));
    }

    #[test]
    fn test_zero_workers_rejected() {
        assert!(Config::default()
            .with_overrides(lookup(&[("GRPC_MAX_WORKERS", "0")]))
            .is_err());
    }

    #[test]
    fn test_toml_partial_file() {
        let config: Config = toml::from_str(
            r#"
            log_level = "DEBUG"

            [model]
            model_name = "v2.onnx"
            "#,
        )
        .unwrap();
        assert_eq!(config.log_level, "DEBUG");
        assert_eq!(config.model.model_name, "v2.onnx");
        assert_eq!(config.model.input_size, 640);
        assert_eq!(config.server.grpc_port, 50051);
    }

    #[test]
    fn test_unbounded_watch_interval_rejected() {
        for raw in ["inf", "NaN", "1e300", "-1"] {
            let err = Config::default()
                .with_overrides(lookup(&[("MODEL_WATCH_INTERVAL", raw)]))
                .unwrap_err();
            assert!(err.to_string().contains("MODEL_WATCH_INTERVAL"), "{raw}: {err}");
        }

        let config = Config::default()
            .with_overrides(lookup(&[("MODEL_WATCH_INTERVAL", "0.25")]))
            .unwrap();
        assert_eq!(config.model.watch_interval().unwrap(), Duration::from_millis(250));
    }

    #[test]
    fn test_load_optional_missing_vs_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.toml");
        assert!(Config::load_optional(missing.to_str().unwrap()).unwrap().is_none());

        let broken = dir.path().join("broken.toml");
        std::fs::write(&broken, "[server\ngrpc_port = ").unwrap();
        let err = Config::load_optional(broken.to_str().unwrap()).unwrap_err();
        assert!(err.to_string().contains("invalid config file"));

        let good = dir.path().join("good.toml");
        std::fs::write(&good, "[server]\ngrpc_port = 6001\n").unwrap();
        let config = Config::load_optional(good.to_str().unwrap()).unwrap().unwrap();
        assert_eq!(config.server.grpc_port, 6001);
    }
}
