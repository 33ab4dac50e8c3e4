//! Mock LLM 客户端（无需 API，用于本地演示）
//!
//! 回显最后一条 User 消息，并报告 system prompt 中携带的记忆条数。

use async_trait::async_trait;

use crate::llm::{LlmClient, LlmError};
use crate::memory::{last_user_content, Message, Role};

#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        let last_user = last_user_content(messages).unwrap_or("(no input)");
        let memories = messages
            .iter()
            .filter(|m| m.role == Role::System)
            .flat_map(|m| m.content.lines())
            .filter(|l| l.starts_with("- "))
            .count();

        Ok(format!(
            "Echo from Mock ({} memories): {}",
            memories, last_user
        ))
    }

    fn model(&self) -> &str {
        "mock"
    }
}
