//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 `.env`（dotenvy），再读 TOML 文件，再用环境变量 `MEMCHAT__*` 覆盖
//! （双下划线表示嵌套，如 `MEMCHAT__LLM__PROVIDER=mock`）。
//! 兼容旧变量：`MODEL_CHOICE` → llm.model，`DATABASE_URL` → memory.database_url，设置时优先级最高。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub memory: MemorySection,
    pub turn: TurnSection,
    pub web: WebSection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 日志文件（追加写入），未设置时只输出到 stderr
    pub log_file: Option<PathBuf>,
}

/// [llm] 段：后端选择、模型与超时
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// openai / deepseek / mock
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    /// 未设置时读 OPENAI_API_KEY（deepseek 读 DEEPSEEK_API_KEY）
    pub api_key: Option<String>,
    #[serde(default)]
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            api_key: None,
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmTimeoutsSection {
    /// 单次请求超时（秒）
    #[serde(default = "default_request_timeout")]
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self {
            request: default_request_timeout(),
        }
    }
}

fn default_request_timeout() -> u64 {
    60
}

/// [memory] 段：向量库选择与连接
#[derive(Debug, Clone, Deserialize)]
pub struct MemorySection {
    /// local / pgvector
    #[serde(default = "default_memory_provider")]
    pub provider: String,
    /// pgvector 连接串（兼容 DATABASE_URL）
    pub database_url: Option<String>,
    #[serde(default = "default_collection")]
    pub collection: String,
    /// local 后端的快照目录
    pub snapshot_dir: Option<PathBuf>,
    #[serde(default = "default_max_entries_per_user")]
    pub max_entries_per_user: usize,
    /// local 后端是否使用嵌入（需要 API key），否则按关键词检索
    #[serde(default = "default_embeddings")]
    pub embeddings: bool,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
}

impl Default for MemorySection {
    fn default() -> Self {
        Self {
            provider: default_memory_provider(),
            database_url: None,
            collection: default_collection(),
            snapshot_dir: None,
            max_entries_per_user: default_max_entries_per_user(),
            embeddings: default_embeddings(),
            embedding_model: default_embedding_model(),
        }
    }
}

fn default_memory_provider() -> String {
    "local".to_string()
}

fn default_collection() -> String {
    "memchat_memories".to_string()
}

fn default_max_entries_per_user() -> usize {
    500
}

fn default_embeddings() -> bool {
    true
}

fn default_embedding_model() -> String {
    crate::llm::DEFAULT_EMBEDDING_MODEL.to_string()
}

/// [turn] 段：单轮对话的检索与诊断参数
#[derive(Debug, Clone, Deserialize)]
pub struct TurnSection {
    #[serde(default = "default_search_limit")]
    pub search_limit: usize,
    /// 写入前后统计记录数，区分「新记忆」与「复用已有记忆」
    #[serde(default = "default_change_detection")]
    pub change_detection: bool,
    #[serde(default)]
    pub count_probe_query: String,
    #[serde(default = "default_count_probe_limit")]
    pub count_probe_limit: usize,
    /// 覆盖默认的助手人设（记忆段落总会追加在其后）
    pub assistant_prompt: Option<String>,
}

impl Default for TurnSection {
    fn default() -> Self {
        Self {
            search_limit: default_search_limit(),
            change_detection: default_change_detection(),
            count_probe_query: String::new(),
            count_probe_limit: default_count_probe_limit(),
            assistant_prompt: None,
        }
    }
}

fn default_search_limit() -> usize {
    crate::core::DEFAULT_SEARCH_LIMIT
}

fn default_change_detection() -> bool {
    true
}

fn default_count_probe_limit() -> usize {
    100
}

/// [web] 段：memchat-web 监听端口（MEMCHAT_WEB_PORT 可覆盖）
#[derive(Debug, Clone, Deserialize)]
pub struct WebSection {
    #[serde(default = "default_web_port")]
    pub port: u16,
}

impl Default for WebSection {
    fn default() -> Self {
        Self {
            port: default_web_port(),
        }
    }
}

fn default_web_port() -> u16 {
    8080
}

/// 从 config 目录加载配置，环境变量 MEMCHAT__* 可覆盖
///
/// 1. 加载 `.env`（不存在时忽略）
/// 2. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 3. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 4. 叠加 MEMCHAT__*；旧变量 MODEL_CHOICE / DATABASE_URL 以 override 形式覆盖一切
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    if let Err(e) = dotenvy::dotenv() {
        tracing::debug!("no .env loaded: {}", e);
    }

    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder
        .set_override_option("llm.model", non_empty_env("MODEL_CHOICE"))?
        .set_override_option("memory.database_url", non_empty_env("DATABASE_URL"))?;

    builder = builder.add_source(
        config::Environment::with_prefix("MEMCHAT")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.llm.provider, "openai");
        assert_eq!(cfg.llm.model, "gpt-4o-mini");
        assert_eq!(cfg.llm.timeouts.request, 60);
        assert_eq!(cfg.memory.provider, "local");
        assert_eq!(cfg.memory.collection, "memchat_memories");
        assert_eq!(cfg.turn.search_limit, 5);
        assert!(cfg.turn.change_detection);
        assert_eq!(cfg.turn.count_probe_limit, 100);
        assert_eq!(cfg.web.port, 8080);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let cfg: AppConfig = config::Config::builder()
            .add_source(config::File::from_str(
                "[llm]\nprovider = \"mock\"\n[memory]\nmax_entries_per_user = 7\n",
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(cfg.llm.provider, "mock");
        assert_eq!(cfg.llm.model, "gpt-4o-mini");
        assert_eq!(cfg.memory.max_entries_per_user, 7);
        assert_eq!(cfg.memory.provider, "local");
        assert_eq!(cfg.turn.search_limit, 5);
    }
}
