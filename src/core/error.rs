//! 配置期错误
//!
//! 只在初始化阶段（构建后端、组装编排器）返回；单轮对话内的后端故障不会以错误形式抛给调用方。

use thiserror::Error;

use crate::memory::MemoryError;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing backend handle: {0}")]
    MissingBackend(&'static str),

    #[error("{0} is not configured (set it in .env or config/default.toml)")]
    MissingApiKey(&'static str),

    #[error("DATABASE_URL is not configured (required by the pgvector memory backend)")]
    MissingDatabaseUrl,

    #[error("Unknown {kind} provider: {name}")]
    UnknownProvider { kind: &'static str, name: String },

    #[error("Provider '{0}' requires building with --features {0}")]
    FeatureDisabled(&'static str),

    #[error("Invalid config: {0}")]
    Invalid(String),

    #[error("Config load failed: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Memory backend setup failed: {0}")]
    Memory(#[from] MemoryError),
}
