//! 配置管理
//!
//! 配置来源按优先级从低到高：默认值、TOML 配置文件、
//! `DICOM2FHIR__` 前缀的环境变量、命令行参数。

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// 转换器完整配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// 输出配置
    pub output: OutputConfig,
    /// 日志配置
    pub logging: LoggingConfig,
}

/// 输出配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// 输出文件路径，为空时写到标准输出
    pub path: Option<String>,
    /// 是否格式化 JSON
    pub pretty: bool,
}

/// 日志配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 日志级别或 EnvFilter 指令
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// 加载配置，`config_path` 为空时只读取环境变量
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        Self::load_with_env(config_path, Self::environment())
    }

    /// `DICOM2FHIR__SECTION__KEY` 形式的环境变量
    fn environment() -> Environment {
        Environment::with_prefix("DICOM2FHIR")
            .separator("__")
            .try_parsing(true)
    }

    fn load_with_env(config_path: Option<&str>, environment: Environment) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path));
        }
        let settings = builder
            .add_source(environment)
            .build()
            .context("Failed to build configuration")?;

        let config: AppConfig = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        debug!("Configuration loaded: {:?}", config);
        Ok(config)
    }

    /// 验证配置
    pub fn validate(&self) -> Result<()> {
        if self.logging.level.trim().is_empty() {
            bail!("logging.level must not be empty");
        }
        if matches!(self.output.path.as_deref(), Some(path) if path.trim().is_empty()) {
            bail!("output.path must not be empty when set");
        }
        Ok(())
    }
}
