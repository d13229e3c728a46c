use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// 指定配置文件路径的环境变量。
pub const CONFIG_ENV: &str = "CITYTILES_CONFIG";

/// 应用配置的根结构。
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub dataset: DatasetConfig,
    #[serde(default)]
    pub merge: MergeConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub publish: PublishConfig,
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

    /// 自动发现配置文件：优先读取环境变量 `CITYTILES_CONFIG`，否则寻找 `./config/default.toml`。
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

/// 瓦片数据集位置与命名前缀。
#[derive(Debug, Clone, Deserialize)]
pub struct DatasetConfig {
    #[serde(default = "DatasetConfig::default_root")]
    pub root: PathBuf,
    #[serde(default = "DatasetConfig::default_name")]
    pub name: String,
}

impl DatasetConfig {
    fn default_root() -> PathBuf {
        PathBuf::from(".")
    }

    fn default_name() -> String {
        "Dataset".to_string()
    }
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            root: Self::default_root(),
            name: Self::default_name(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissPolicy {
    #[default]
    Abort,
    Skip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LookupGuard {
    #[default]
    Entity,
    Tile,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MergeConfig {
    #[serde(default = "MergeConfig::default_converter")]
    pub converter: PathBuf,
    /// 追加在 `--input/--output` 之前的转换器参数。
    #[serde(default)]
    pub converter_args: Vec<String>,
    #[serde(default)]
    pub miss_policy: MissPolicy,
    #[serde(default)]
    pub lookup_guard: LookupGuard,
}

impl MergeConfig {
    fn default_converter() -> PathBuf {
        PathBuf::from("COLLADA2GLTF")
    }
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            converter: Self::default_converter(),
            converter_args: Vec::new(),
            miss_policy: MissPolicy::default(),
            lookup_guard: LookupGuard::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ExtractionConfig {
    #[serde(default)]
    pub height_offset: f64,
    #[serde(default = "ExtractionConfig::default_heading_offset")]
    pub heading_offset: f64,
}

impl ExtractionConfig {
    fn default_heading_offset() -> f64 {
        90.0
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            height_offset: 0.0,
            heading_offset: Self::default_heading_offset(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PublishConfig {
    #[serde(default = "PublishConfig::default_store")]
    pub store: PathBuf,
    #[serde(default = "PublishConfig::default_output")]
    pub output: PathBuf,
}

impl PublishConfig {
    fn default_store() -> PathBuf {
        PathBuf::from("store")
    }

    fn default_output() -> PathBuf {
        PathBuf::from("output")
    }
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            store: Self::default_store(),
            output: Self::default_output(),
        }
    }
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
