//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / DeepSeek / Mock）实现 LlmClient：无状态的一问一答补全。

use async_trait::async_trait;
use thiserror::Error;

use crate::memory::Message;

/// LLM 调用失败的原因（鉴权、额度、网络、超时、API 其它错误）
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("quota exceeded: {0}")]
    Quota(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out after {0}s")]
    Timeout(u64),

    #[error("{0}")]
    Api(String),

    #[error("empty response from model")]
    EmptyResponse,
}

impl LlmError {
    /// 按错误文本归类：401 / invalid key → Auth，429 / quota → Quota，其余为 Api
    pub fn classify(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let lower = raw.to_lowercase();
        if lower.contains("401")
            || lower.contains("invalid_api_key")
            || lower.contains("incorrect api key")
            || lower.contains("unauthorized")
        {
            LlmError::Auth(raw)
        } else if lower.contains("insufficient_quota")
            || lower.contains("429")
            || lower.contains("rate limit")
            || lower.contains("quota")
        {
            LlmError::Quota(raw)
        } else {
            LlmError::Api(raw)
        }
    }
}

/// LLM 客户端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式补全，返回首个 choice 的文本
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError>;

    /// 模型名（日志与诊断用）
    fn model(&self) -> &str;

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
