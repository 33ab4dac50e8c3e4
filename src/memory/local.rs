//! 本地按用户隔离的长期记忆
//!
//! 每个 user_id 一组记忆；配置了嵌入提供方时按余弦相似度检索，否则按分词 Jaccard 相似度。
//! 写入时只把 exchange 中的 user 消息作为事实保存，规范化后重复的事实视为「复用」而不重复写入。
//! 可选快照目录：每用户一个 JSON 文件，首次访问时懒加载，每次写入后落盘。
//! 文件名由可读前缀加原始 user_id 的十六进制编码组成，不同 user_id 不会落到同一文件；
//! 快照内记录 owner，加载时不匹配即报错。

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

use crate::llm::{cosine_similarity, EmbeddingProvider};
use crate::memory::tokenizer::{jaccard_similarity, normalize, tokenize_to_set};
use crate::memory::{
    AddReport, CountProbe, MemoryBackend, MemoryError, MemoryRecord, Message, Role,
};

/// 本地记忆配置
#[derive(Debug, Clone)]
pub struct LocalMemoryConfig {
    /// 每用户最大条目数，超出时淘汰最旧的
    pub max_entries_per_user: usize,
    /// 快照目录（每用户一个文件），None 表示仅内存
    pub snapshot_dir: Option<PathBuf>,
}

impl Default for LocalMemoryConfig {
    fn default() -> Self {
        Self {
            max_entries_per_user: 500,
            snapshot_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredMemory {
    id: String,
    text: String,
    created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    embedding: Vec<f32>,
}

/// 快照文件内容
#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    owner: String,
    entries: Vec<StoredMemory>,
}

impl StoredMemory {
    fn to_record(&self, owner: &str, score: f32) -> MemoryRecord {
        MemoryRecord {
            id: self.id.clone(),
            text: self.text.clone(),
            owner: owner.to_string(),
            score,
            created_at: self.created_at,
        }
    }
}

/// 本地记忆后端
pub struct LocalMemory {
    config: LocalMemoryConfig,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    /// user_id -> 按写入顺序排列的记忆
    users: RwLock<HashMap<String, Vec<StoredMemory>>>,
    /// 串行化快照写入，保证最后落盘的是最新状态
    save_lock: Mutex<()>,
}

impl LocalMemory {
    pub fn new(config: LocalMemoryConfig, embedder: Option<Arc<dyn EmbeddingProvider>>) -> Self {
        Self {
            config,
            embedder,
            users: RwLock::new(HashMap::new()),
            save_lock: Mutex::new(()),
        }
    }

    /// 仅内存、关键词检索
    pub fn in_memory() -> Self {
        Self::new(LocalMemoryConfig::default(), None)
    }

    pub fn uses_embeddings(&self) -> bool {
        self.embedder.is_some()
    }

    fn snapshot_path(&self, user_id: &str) -> Option<PathBuf> {
        self.config
            .snapshot_dir
            .as_ref()
            .map(|dir| dir.join(snapshot_file_name(user_id)))
    }

    async fn load_snapshot(&self, user_id: &str) -> Result<Vec<StoredMemory>, MemoryError> {
        let Some(path) = self.snapshot_path(user_id) else {
            return Ok(Vec::new());
        };
        match tokio::fs::read_to_string(&path).await {
            Ok(data) => {
                let snapshot: Snapshot = serde_json::from_str(&data)?;
                if snapshot.owner != user_id {
                    return Err(MemoryError::Storage(format!(
                        "{} belongs to '{}', not '{}'",
                        path.display(),
                        snapshot.owner,
                        user_id
                    )));
                }
                Ok(snapshot.entries)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(MemoryError::Storage(format!("{}: {}", path.display(), e))),
        }
    }

    /// 把该用户当前的记忆写入快照：先写临时文件再 rename，不会留下半截文件
    async fn save_snapshot(&self, user_id: &str) -> Result<(), MemoryError> {
        let Some(path) = self.snapshot_path(user_id) else {
            return Ok(());
        };
        let _guard = self.save_lock.lock().await;
        // 持锁后再取快照，后写入者总是写最新状态
        let entries = self
            .users
            .read()
            .await
            .get(user_id)
            .cloned()
            .unwrap_or_default();
        let data = serde_json::to_string_pretty(&Snapshot {
            owner: user_id.to_string(),
            entries,
        })?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| MemoryError::Storage(e.to_string()))?;
        }
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, data)
            .await
            .map_err(|e| MemoryError::Storage(format!("{}: {}", tmp.display(), e)))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| MemoryError::Storage(format!("{}: {}", path.display(), e)))
    }

    /// 确保该用户的快照已加载到内存
    async fn ensure_loaded(&self, user_id: &str) -> Result<(), MemoryError> {
        if self.users.read().await.contains_key(user_id) {
            return Ok(());
        }
        let loaded = self.load_snapshot(user_id).await?;
        self.users
            .write()
            .await
            .entry(user_id.to_string())
            .or_insert(loaded);
        Ok(())
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, MemoryError> {
        match &self.embedder {
            Some(embedder) => embedder.embed(text).await.map_err(MemoryError::Embedding),
            None => Ok(Vec::new()),
        }
    }

    /// 删除某用户全部记忆（含快照文件），返回是否存在过
    pub async fn clear_user(&self, user_id: &str) -> Result<bool, MemoryError> {
        self.ensure_loaded(user_id).await?;
        let _guard = self.save_lock.lock().await;
        let existed = self
            .users
            .write()
            .await
            .remove(user_id)
            .is_some_and(|entries| !entries.is_empty());
        if let Some(path) = self.snapshot_path(user_id) {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(MemoryError::Storage(e.to_string())),
            }
        }
        Ok(existed)
    }

    /// 已加载到内存的用户
    pub async fn list_users(&self) -> Vec<String> {
        self.users.read().await.keys().cloned().collect()
    }
}

#[async_trait]
impl MemoryBackend for LocalMemory {
    async fn search(
        &self,
        query: &str,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<MemoryRecord>, MemoryError> {
        self.ensure_loaded(user_id).await?;

        // 空查询：列出最近的记忆
        if query.trim().is_empty() {
            let users = self.users.read().await;
            return Ok(users
                .get(user_id)
                .map(|entries| {
                    entries
                        .iter()
                        .rev()
                        .take(limit)
                        .map(|m| m.to_record(user_id, 1.0))
                        .collect()
                })
                .unwrap_or_default());
        }

        let query_embedding = self.embed(query).await?;
        let query_tokens = tokenize_to_set(query);

        let users = self.users.read().await;
        let Some(entries) = users.get(user_id) else {
            return Ok(Vec::new());
        };
        let mut scored: Vec<(f32, &StoredMemory)> = entries
            .iter()
            .map(|m| {
                let score = if !query_embedding.is_empty() && !m.embedding.is_empty() {
                    cosine_similarity(&query_embedding, &m.embedding)
                } else {
                    jaccard_similarity(&query_tokens, &tokenize_to_set(&m.text))
                };
                (score, m)
            })
            .filter(|(score, _)| *score > 0.0)
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        Ok(scored
            .into_iter()
            .take(limit)
            .map(|(score, m)| m.to_record(user_id, score))
            .collect())
    }

    async fn add(&self, exchange: &[Message], user_id: &str) -> Result<AddReport, MemoryError> {
        self.ensure_loaded(user_id).await?;

        let facts: Vec<&str> = exchange
            .iter()
            .filter(|m| m.role == Role::User)
            .map(|m| m.content.trim())
            .filter(|t| !t.is_empty())
            .collect();

        // 嵌入在持锁之前计算
        let mut candidates = Vec::with_capacity(facts.len());
        for text in facts {
            let embedding = self.embed(text).await?;
            candidates.push(StoredMemory {
                id: uuid::Uuid::new_v4().to_string(),
                text: text.to_string(),
                created_at: Utc::now(),
                embedding,
            });
        }

        let mut report = AddReport::default();
        {
            let mut users = self.users.write().await;
            let entries = users.entry(user_id.to_string()).or_default();
            for candidate in candidates {
                let key = normalize(&candidate.text);
                if entries.iter().any(|m| normalize(&m.text) == key) {
                    report.reused += 1;
                    continue;
                }
                report.added.push(candidate.to_record(user_id, 1.0));
                entries.push(candidate);
            }
            let n = entries.len();
            if n > self.config.max_entries_per_user {
                entries.drain(0..n - self.config.max_entries_per_user);
            }
        }

        if !report.added.is_empty() {
            self.save_snapshot(user_id).await?;
        }
        tracing::debug!(
            user_id,
            added = report.added.len(),
            reused = report.reused,
            "local memory add"
        );
        Ok(report)
    }

    async fn count(&self, user_id: &str, _probe: &CountProbe) -> Result<usize, MemoryError> {
        self.ensure_loaded(user_id).await?;
        Ok(self.users.read().await.get(user_id).map_or(0, Vec::len))
    }

    async fn flush(&self) -> Result<(), MemoryError> {
        let user_ids: Vec<String> = self.users.read().await.keys().cloned().collect();
        for user_id in user_ids {
            self.save_snapshot(&user_id).await?;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "local"
    }
}

/// 快照文件名：`user_<可读前缀>_<user_id 的十六进制>.json`，十六进制部分保证不同 user_id 不冲突
fn snapshot_file_name(user_id: &str) -> String {
    let readable: String = sanitize_user_id(user_id).chars().take(32).collect();
    let hex: String = user_id.bytes().map(|b| format!("{b:02x}")).collect();
    format!("user_{readable}_{hex}.json")
}

/// 清理 user_id 中的特殊字符用于文件名
fn sanitize_user_id(user_id: &str) -> String {
    user_id
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
