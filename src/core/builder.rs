//! 初始化：从配置构建后端，并组装 TurnOrchestrator
//!
//! 进程启动时调用一次 [`setup`]，之后所有轮次共享同一组后端句柄；
//! 缺少句柄或必需配置都在这里以 [`ConfigError`] 失败，而不是推迟到对话中。

use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;
use crate::core::{ConfigError, TurnConfig, TurnOrchestrator};
use crate::llm::{
    create_deepseek_client, create_embedder, EmbeddingProvider, LlmClient, MockLlmClient,
    OpenAiClient,
};
use crate::memory::{LocalMemory, LocalMemoryConfig, MemoryBackend};

/// TurnOrchestrator 构建器：两个后端句柄都必须提供
#[derive(Default)]
pub struct TurnOrchestratorBuilder {
    llm: Option<Arc<dyn LlmClient>>,
    memory: Option<Arc<dyn MemoryBackend>>,
    config: TurnConfig,
}

impl TurnOrchestratorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn memory(mut self, memory: Arc<dyn MemoryBackend>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn config(mut self, config: TurnConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<TurnOrchestrator, ConfigError> {
        let llm = self.llm.ok_or(ConfigError::MissingBackend("llm"))?;
        let memory = self.memory.ok_or(ConfigError::MissingBackend("memory"))?;
        Ok(TurnOrchestrator::new(llm, memory, self.config))
    }
}

/// 进程级后端句柄
#[derive(Clone)]
pub struct Backends {
    pub llm: Arc<dyn LlmClient>,
    pub memory: Arc<dyn MemoryBackend>,
}

impl Backends {
    pub fn orchestrator(&self, config: TurnConfig) -> TurnOrchestrator {
        TurnOrchestrator::new(Arc::clone(&self.llm), Arc::clone(&self.memory), config)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// 配置中的 key 优先，其次环境变量
pub(crate) fn resolve_key(configured: Option<&str>, env_keys: &[&str]) -> Option<String> {
    non_empty(configured.map(String::from))
        .or_else(|| env_keys.iter().find_map(|k| non_empty(std::env::var(k).ok())))
}

/// 根据 [llm] 段创建 LLM 客户端
pub fn create_llm(cfg: &AppConfig) -> Result<Arc<dyn LlmClient>, ConfigError> {
    let timeout = Duration::from_secs(cfg.llm.timeouts.request.max(1));
    match cfg.llm.provider.to_lowercase().as_str() {
        "openai" => {
            let key = resolve_key(cfg.llm.api_key.as_deref(), &["OPENAI_API_KEY"])
                .ok_or(ConfigError::MissingApiKey("OPENAI_API_KEY"))?;
            tracing::info!("Using OpenAI LLM ({})", cfg.llm.model);
            Ok(Arc::new(
                OpenAiClient::new(cfg.llm.base_url.as_deref(), &cfg.llm.model, &key)
                    .with_timeout(timeout),
            ))
        }
        "deepseek" => {
            let key = resolve_key(
                cfg.llm.api_key.as_deref(),
                &["DEEPSEEK_API_KEY", "OPENAI_API_KEY"],
            )
            .ok_or(ConfigError::MissingApiKey("DEEPSEEK_API_KEY"))?;
            let client = create_deepseek_client(&key, None).with_timeout(timeout);
            tracing::info!("Using DeepSeek LLM ({})", client.model());
            Ok(Arc::new(client))
        }
        "mock" => {
            tracing::warn!("Using Mock LLM, replies are echoes");
            Ok(Arc::new(MockLlmClient))
        }
        other => Err(ConfigError::UnknownProvider {
            kind: "llm",
            name: other.to_string(),
        }),
    }
}

/// 嵌入用的 key：llm.provider 为 openai 时复用 llm.api_key，否则只看 OPENAI_API_KEY
pub(crate) fn embedding_api_key(cfg: &AppConfig) -> Option<String> {
    let configured = if cfg.llm.provider.eq_ignore_ascii_case("openai") {
        cfg.llm.api_key.as_deref()
    } else {
        None
    };
    resolve_key(configured, &["OPENAI_API_KEY"])
}

/// 嵌入始终走 OpenAI 兼容端点；仅当 llm.provider 为 openai 时复用其 base_url
fn create_embedder_from_config(cfg: &AppConfig) -> Option<Arc<dyn EmbeddingProvider>> {
    let key = embedding_api_key(cfg);
    let base_url = if cfg.llm.provider.eq_ignore_ascii_case("openai") {
        cfg.llm.base_url.as_deref()
    } else {
        None
    };
    create_embedder(base_url, &cfg.memory.embedding_model, key.as_deref())
}

/// 根据 [memory] 段创建记忆后端
pub async fn create_memory(cfg: &AppConfig) -> Result<Arc<dyn MemoryBackend>, ConfigError> {
    match cfg.memory.provider.to_lowercase().as_str() {
        "local" => {
            let embedder = if cfg.memory.embeddings {
                create_embedder_from_config(cfg)
            } else {
                None
            };
            if embedder.is_none() {
                tracing::info!("Local memory uses keyword retrieval (no embeddings)");
            }
            let local = LocalMemory::new(
                LocalMemoryConfig {
                    max_entries_per_user: cfg.memory.max_entries_per_user.max(1),
                    snapshot_dir: cfg.memory.snapshot_dir.clone(),
                },
                embedder,
            );
            Ok(Arc::new(local))
        }
        "pgvector" => create_pgvector(cfg).await,
        other => Err(ConfigError::UnknownProvider {
            kind: "memory",
            name: other.to_string(),
        }),
    }
}

#[cfg(feature = "pgvector")]
async fn create_pgvector(cfg: &AppConfig) -> Result<Arc<dyn MemoryBackend>, ConfigError> {
    use crate::memory::pgvector::valid_collection_name;
    use crate::memory::PgVectorMemory;

    let url = non_empty(cfg.memory.database_url.clone()).ok_or(ConfigError::MissingDatabaseUrl)?;
    if !valid_collection_name(&cfg.memory.collection) {
        return Err(ConfigError::Invalid(format!(
            "memory.collection '{}' must be alphanumeric/underscore",
            cfg.memory.collection
        )));
    }
    let embedder =
        create_embedder_from_config(cfg).ok_or(ConfigError::MissingApiKey("OPENAI_API_KEY"))?;
    let memory = PgVectorMemory::connect(&url, &cfg.memory.collection, embedder).await?;
    tracing::info!("Connected to pgvector collection '{}'", cfg.memory.collection);
    Ok(Arc::new(memory))
}

#[cfg(not(feature = "pgvector"))]
async fn create_pgvector(_cfg: &AppConfig) -> Result<Arc<dyn MemoryBackend>, ConfigError> {
    Err(ConfigError::FeatureDisabled("pgvector"))
}

/// 构建全部后端；任何配置缺失都在此失败
pub async fn setup(cfg: &AppConfig) -> Result<Backends, ConfigError> {
    tracing::info!("Initializing backends");
    let llm = create_llm(cfg)?;
    let memory = create_memory(cfg).await?;
    tracing::info!(memory = memory.name(), model = llm.model(), "Backends ready");
    Ok(Backends { llm, memory })
}
