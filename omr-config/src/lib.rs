use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use omr_core::resolver::StaffGapPolicy;
use serde::Deserialize;
use thiserror::Error;

/// 环境变量：显式指定配置文件路径。
pub const CONFIG_ENV: &str = "OMR_CONFIG";

/// 应用配置的根结构。
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub assembly: AssemblyConfig,
    #[serde(default)]
    pub numbering: NumberingConfig,
    #[serde(default)]
    pub input: InputConfig,
}

impl AppConfig {
    /// 从显式路径加载配置。
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// 自动发现配置文件：优先读取环境变量 `OMR_CONFIG`，否则寻找 `./config/default.toml`。
    /// 若文件缺失，则返回默认配置。
    pub fn discover() -> Result<Self, ConfigError> {
        if let Some(path) = env::var_os(CONFIG_ENV) {
            return Self::from_file(PathBuf::from(path));
        }

        let default_path = env::current_dir()
            .map(|dir| dir.join("config").join("default.toml"))
            .map_err(|source| ConfigError::Context {
                message: "获取当前工作目录失败".to_string(),
                source,
            })?;

        if default_path.exists() {
            Self::from_file(default_path)
        } else {
            Ok(Self::default())
        }
    }
}

/// 日志配置，支持设置默认等级。
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssemblyConfig {
    /// `midpoint` / `above` / `below`
    #[serde(default)]
    pub staff_gap_policy: StaffGapPolicy,
    #[serde(default = "default_true")]
    pub fermata_fallback: bool,
}

impl Default for AssemblyConfig {
    fn default() -> Self {
        Self {
            staff_gap_policy: StaffGapPolicy::default(),
            fermata_fallback: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NumberingConfig {
    #[serde(default = "default_true")]
    pub honor_specific_ids: bool,
    #[serde(default = "default_true")]
    pub reconcile_deltas: bool,
}

impl Default for NumberingConfig {
    fn default() -> Self {
        Self {
            honor_specific_ids: true,
            reconcile_deltas: true,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InputConfig {
    /// JSON 乐谱描述；为空时使用内置演示乐谱。
    #[serde(default)]
    pub sheet: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("读取配置文件 {path:?} 失败: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("解析配置文件 {path:?} 失败: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("{message}")]
    Context {
        message: String,
        #[source]
        source: std::io::Error,
    },
}
