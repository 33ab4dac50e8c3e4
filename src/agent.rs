//! 无界面助手运行时
//!
//! 供 CLI、HTTP API 等前端调用：初始化一次（from_config），之后每条消息调用 process_message。

use std::sync::Arc;

use crate::config::AppConfig;
use crate::core::{setup, Backends, ConfigError, TurnConfig, TurnOrchestrator, TurnRequest, TurnResult};
use crate::memory::{MemoryError, MemoryRecord};

/// 列出用户记忆时的默认条数
pub const DEFAULT_LIST_LIMIT: usize = 10;

/// 助手：持有编排器（以及其后端句柄），可在多个请求间共享
pub struct Assistant {
    orchestrator: TurnOrchestrator,
}

impl Assistant {
    pub fn new(orchestrator: TurnOrchestrator) -> Self {
        Self { orchestrator }
    }

    /// 按配置构建后端与编排器；配置缺失时返回 ConfigError
    pub async fn from_config(cfg: &AppConfig) -> Result<Self, ConfigError> {
        let backends = setup(cfg).await?;
        Ok(Self::from_backends(&backends, TurnConfig::from_section(&cfg.turn)))
    }

    pub fn from_backends(backends: &Backends, config: TurnConfig) -> Self {
        Self::new(backends.orchestrator(config))
    }

    pub fn orchestrator(&self) -> &TurnOrchestrator {
        &self.orchestrator
    }

    /// 处理一条消息；总会返回结果
    pub async fn process_message(&self, message: &str, user_id: &str) -> TurnResult {
        self.orchestrator
            .handle(TurnRequest::new(message, user_id))
            .await
    }

    /// 列出用户最近的记忆（空查询）
    pub async fn user_memories(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<MemoryRecord>, MemoryError> {
        let user_id = crate::core::resolve_user_id(user_id);
        self.orchestrator
            .memory()
            .search("", user_id, limit)
            .await
    }

    /// 退出前落盘
    pub async fn shutdown(&self) {
        if let Err(e) = self.orchestrator.memory().flush().await {
            tracing::warn!("memory flush on shutdown failed: {}", e);
        }
    }
}

/// 多前端共享的句柄
pub type SharedAssistant = Arc<Assistant>;
