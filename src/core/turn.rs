//! 单轮对话流水线：检索记忆 → 组装 Prompt → 调用 LLM → 写回记忆
//!
//! 每个阶段的后端故障都在调用点就地处理：
//! - 检索失败：视为零条记忆，只记日志；
//! - 生成失败：立即返回以 [`GENERATION_FAILURE_PREFIX`] 开头、带原始错误的回复（唯一对用户可见的失败）；
//! - 写入失败（含前后计数）：记 warn，回复不变。
//!
//! 因此 [`run_turn`] / [`TurnOrchestrator::handle`] 总会返回一条回复，不会返回错误。

use std::sync::Arc;

use serde::Serialize;

use crate::config::TurnSection;
use crate::llm::LlmClient;
use crate::memory::{CountProbe, MemoryBackend, MemoryRecord, Message};

/// 调用方未提供 user_id 时使用的默认用户
pub const DEFAULT_USER_ID: &str = "default_user";

/// 每轮检索的记忆条数
pub const DEFAULT_SEARCH_LIMIT: usize = 5;

/// 生成失败时回复的固定前缀，调用方可据此识别失败轮次
pub const GENERATION_FAILURE_PREFIX: &str = "Error communicating with the language model: ";

pub const DEFAULT_ASSISTANT_PROMPT: &str = "You are a helpful and friendly assistant. \
Answer the user's question based on the available memories and the current query.";

const NO_MEMORIES_NOTE: &str = "(no relevant memories found)";

/// 单轮对话参数
#[derive(Debug, Clone)]
pub struct TurnConfig {
    pub search_limit: usize,
    /// 写入前后统计记录数，仅用于日志与 [`Persistence`] 诊断
    pub change_detection: bool,
    pub count_probe: CountProbe,
    pub assistant_prompt: String,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            search_limit: DEFAULT_SEARCH_LIMIT,
            change_detection: true,
            count_probe: CountProbe::default(),
            assistant_prompt: DEFAULT_ASSISTANT_PROMPT.to_string(),
        }
    }
}

impl TurnConfig {
    /// 从 [turn] 段构建；未配置人设（或为空白）时用内置默认
    pub fn from_section(section: &TurnSection) -> Self {
        let assistant_prompt = section
            .assistant_prompt
            .clone()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_ASSISTANT_PROMPT.to_string());

        Self {
            search_limit: section.search_limit.max(1),
            change_detection: section.change_detection,
            count_probe: CountProbe {
                query: section.count_probe_query.clone(),
                limit: section.count_probe_limit,
            },
            assistant_prompt,
        }
    }
}

/// 一次对话请求
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub message: String,
    pub user_id: String,
}

impl TurnRequest {
    pub fn new(message: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            user_id: user_id.into(),
        }
    }
}

/// 记忆写入结果（诊断用，不影响回复）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Persistence {
    /// 写入成功且记录数增加（或计数不可用时的乐观假设）
    Stored,
    /// 写入成功但记录数未变：已有记忆被复用
    Reused,
    /// 写入失败
    Failed,
    /// 生成失败，未尝试写入
    Skipped,
}

/// 一轮对话的结果
#[derive(Debug, Clone, Serialize)]
pub struct TurnResult {
    pub response: String,
    /// add 调用是否成功
    pub memory_written: bool,
    /// 本轮检索到的记忆条数
    pub retrieved: usize,
    pub persistence: Persistence,
    pub generation_failed: bool,
}

/// 空白 user_id 替换为 [`DEFAULT_USER_ID`]
pub fn resolve_user_id(user_id: &str) -> &str {
    let trimmed = user_id.trim();
    if trimmed.is_empty() {
        DEFAULT_USER_ID
    } else {
        trimmed
    }
}

/// 组装 system 指令：人设 + 每条记忆一行（`- ` 前缀）；无记忆时明确说明
pub fn compose_system_prompt(assistant_prompt: &str, memories: &[MemoryRecord]) -> String {
    let section = if memories.is_empty() {
        NO_MEMORIES_NOTE.to_string()
    } else {
        memories
            .iter()
            .map(|m| format!("- {}", m.text))
            .collect::<Vec<_>>()
            .join("\n")
    };
    format!("{}\nUser memories:\n{}", assistant_prompt, section)
}

/// 截断到 max_chars 个字符，超出时追加 `...`
pub fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        let head: String = text.chars().take(max_chars).collect();
        format!("{head}...")
    } else {
        text.to_string()
    }
}

/// 单轮对话编排器：持有两个后端句柄，进程内共享
pub struct TurnOrchestrator {
    llm: Arc<dyn LlmClient>,
    memory: Arc<dyn MemoryBackend>,
    config: TurnConfig,
}

impl TurnOrchestrator {
    pub fn new(llm: Arc<dyn LlmClient>, memory: Arc<dyn MemoryBackend>, config: TurnConfig) -> Self {
        Self {
            llm,
            memory,
            config,
        }
    }

    pub fn builder() -> crate::core::TurnOrchestratorBuilder {
        crate::core::TurnOrchestratorBuilder::new()
    }

    pub fn llm(&self) -> &Arc<dyn LlmClient> {
        &self.llm
    }

    pub fn memory(&self) -> &Arc<dyn MemoryBackend> {
        &self.memory
    }

    pub fn config(&self) -> &TurnConfig {
        &self.config
    }

    pub async fn handle(&self, request: TurnRequest) -> TurnResult {
        execute_turn(
            self.llm.as_ref(),
            self.memory.as_ref(),
            &self.config,
            &request.message,
            &request.user_id,
        )
        .await
    }
}

/// 以默认参数跑一轮对话，只返回回复文本
pub async fn run_turn(
    message: &str,
    user_id: &str,
    llm: &dyn LlmClient,
    memory: &dyn MemoryBackend,
) -> String {
    execute_turn(llm, memory, &TurnConfig::default(), message, user_id)
        .await
        .response
}

async fn execute_turn(
    llm: &dyn LlmClient,
    memory: &dyn MemoryBackend,
    config: &TurnConfig,
    message: &str,
    user_id: &str,
) -> TurnResult {
    let user_id = resolve_user_id(user_id);
    tracing::info!(user_id, backend = memory.name(), "processing message");

    let memories = match memory.search(message, user_id, config.search_limit).await {
        Ok(found) => {
            tracing::info!(user_id, retrieved = found.len(), "retrieved relevant memories");
            found
        }
        Err(e) => {
            tracing::warn!(user_id, error = %e, "memory search failed, continuing without memories");
            Vec::new()
        }
    };
    let retrieved = memories.len();

    let system_prompt = compose_system_prompt(&config.assistant_prompt, &memories);
    let mut exchange = vec![Message::system(system_prompt), Message::user(message)];

    let reply = match llm.complete(&exchange).await {
        Ok(reply) => reply,
        Err(e) => {
            tracing::error!(user_id, model = llm.model(), error = %e, "language model call failed");
            return TurnResult {
                response: format!("{GENERATION_FAILURE_PREFIX}{e}"),
                memory_written: false,
                retrieved,
                persistence: Persistence::Skipped,
                generation_failed: true,
            };
        }
    };

    exchange.push(Message::assistant(reply.clone()));
    let persistence = persist(memory, config, &exchange, user_id).await;

    match persistence {
        Persistence::Stored => tracing::info!(
            user_id,
            content = %preview(message, 30),
            "new memory stored"
        ),
        Persistence::Reused => tracing::info!(
            user_id,
            query = %preview(message, 30),
            retrieved,
            "existing memory reused, nothing new stored"
        ),
        Persistence::Failed | Persistence::Skipped => {}
    }

    TurnResult {
        response: reply,
        memory_written: persistence != Persistence::Failed,
        retrieved,
        persistence,
        generation_failed: false,
    }
}

/// 写入 exchange；AddReport 有新记录即为 Stored，否则由前后计数决定，任一计数失败都按「已写入」处理
async fn persist(
    memory: &dyn MemoryBackend,
    config: &TurnConfig,
    exchange: &[Message],
    user_id: &str,
) -> Persistence {
    let before = if config.change_detection {
        count_or_none(memory, config, user_id, "before add").await
    } else {
        None
    };

    let report = match memory.add(exchange, user_id).await {
        Ok(report) => report,
        Err(e) => {
            tracing::warn!(user_id, error = %e, "failed to store memory, response is unaffected");
            return Persistence::Failed;
        }
    };
    tracing::debug!(
        user_id,
        added = report.added.len(),
        reused = report.reused,
        "memory add completed"
    );

    // 后端明确报告了新记录：淘汰旧记录时计数可能不变
    if !report.added.is_empty() || !config.change_detection {
        return Persistence::Stored;
    }
    let after = count_or_none(memory, config, user_id, "after add").await;
    match (before, after) {
        (Some(b), Some(a)) if a <= b => Persistence::Reused,
        _ => Persistence::Stored,
    }
}

async fn count_or_none(
    memory: &dyn MemoryBackend,
    config: &TurnConfig,
    user_id: &str,
    stage: &str,
) -> Option<usize> {
    match memory.count(user_id, &config.count_probe).await {
        Ok(n) => Some(n),
        Err(e) => {
            tracing::warn!(user_id, stage, error = %e, "memory count failed");
            None
        }
    }
}
