//! 长期记忆后端抽象
//!
//! 按 user_id 隔离的向量记忆：search（相似度检索）、add（写入一轮对话）、count（记录数，仅用于诊断）。
//! 本地实现见 [`LocalMemory`](super::LocalMemory)，Postgres + pgvector 实现需启用 `pgvector` feature。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::memory::Message;

/// 记忆后端错误（连接、嵌入、存储、序列化）
#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("Memory backend connection failed: {0}")]
    Connection(String),

    #[error("Embedding failed: {0}")]
    Embedding(String),

    #[error("Memory storage error: {0}")]
    Storage(String),

    #[error("Memory serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// 一条记忆：创建后不可变，归后端所有
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: String,
    /// 自然语言事实
    pub text: String,
    /// 所属用户
    pub owner: String,
    /// 相似度分数（范围由后端决定）
    pub score: f32,
    pub created_at: DateTime<Utc>,
}

/// add 的结果：新写入的记录与因重复而复用的条数
#[derive(Debug, Clone, Default)]
pub struct AddReport {
    pub added: Vec<MemoryRecord>,
    pub reused: usize,
}

/// 通用 count 实现使用的探测查询（部分后端要求非空 query 才能生成嵌入）
#[derive(Debug, Clone)]
pub struct CountProbe {
    pub query: String,
    pub limit: usize,
}

impl Default for CountProbe {
    fn default() -> Self {
        Self {
            query: String::new(),
            limit: 100,
        }
    }
}

/// 记忆后端 trait：所有操作都以 user_id 为作用域
#[async_trait]
pub trait MemoryBackend: Send + Sync {
    /// 按 query 检索该用户最相关的 limit 条，按分数降序
    async fn search(
        &self,
        query: &str,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<MemoryRecord>, MemoryError>;

    /// 写入一轮对话（system / user / assistant）
    async fn add(&self, exchange: &[Message], user_id: &str) -> Result<AddReport, MemoryError>;

    /// 该用户的记录数；默认用探测查询的检索结果条数近似，能精确计数的后端应覆盖
    async fn count(&self, user_id: &str, probe: &CountProbe) -> Result<usize, MemoryError> {
        Ok(self.search(&probe.query, user_id, probe.limit).await?.len())
    }

    /// 将缓冲写入持久层（无缓冲的后端为空操作）
    async fn flush(&self) -> Result<(), MemoryError> {
        Ok(())
    }

    /// 后端名称（日志与诊断用）
    fn name(&self) -> &str;
}
