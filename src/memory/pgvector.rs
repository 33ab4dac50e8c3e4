//! Postgres + pgvector 记忆后端（Supabase 等托管 Postgres 均可）
//!
//! 需要启用 `pgvector` feature。首次连接时创建 vector 扩展与集合表；
//! 检索按余弦距离 `<=>` 排序，分数为 1 - 距离。

#[cfg(feature = "pgvector")]
mod sqlx_impl {
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use sqlx::postgres::{PgPool, PgPoolOptions};
    use sqlx::Row;

    use crate::llm::EmbeddingProvider;
    use crate::memory::tokenizer::normalize;
    use crate::memory::{
        AddReport, CountProbe, MemoryBackend, MemoryError, MemoryRecord, Message, Role,
    };

    fn db_err(e: sqlx::Error) -> MemoryError {
        match e {
            sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                MemoryError::Connection(e.to_string())
            }
            other => MemoryError::Storage(other.to_string()),
        }
    }

    /// pgvector 字面量：'[0.1,0.2,...]'
    fn vector_literal(v: &[f32]) -> String {
        let parts: Vec<String> = v.iter().map(|x| x.to_string()).collect();
        format!("[{}]", parts.join(","))
    }

    /// 集合名只允许字母数字与下划线，直接拼入 SQL 标识符
    pub fn valid_collection_name(name: &str) -> bool {
        !name.is_empty()
            && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
            && !name.starts_with(|c: char| c.is_ascii_digit())
    }

    /// pgvector 记忆后端
    pub struct PgVectorMemory {
        pool: PgPool,
        table: String,
        embedder: Arc<dyn EmbeddingProvider>,
    }

    impl PgVectorMemory {
        /// 连接数据库并初始化扩展与表
        pub async fn connect(
            database_url: &str,
            collection: &str,
            embedder: Arc<dyn EmbeddingProvider>,
        ) -> Result<Self, MemoryError> {
            if !valid_collection_name(collection) {
                return Err(MemoryError::Storage(format!(
                    "invalid collection name: {collection}"
                )));
            }
            let pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(database_url)
                .await
                .map_err(|e| MemoryError::Connection(e.to_string()))?;

            let memory = Self {
                pool,
                table: collection.to_string(),
                embedder,
            };
            memory.init_tables().await?;
            Ok(memory)
        }

        async fn init_tables(&self) -> Result<(), MemoryError> {
            sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
                .execute(&self.pool)
                .await
                .map_err(db_err)?;

            sqlx::query(&format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    id TEXT PRIMARY KEY,
                    user_id TEXT NOT NULL,
                    memory TEXT NOT NULL,
                    normalized TEXT NOT NULL,
                    embedding vector NOT NULL,
                    created_at TIMESTAMPTZ NOT NULL
                )",
                self.table
            ))
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

            sqlx::query(&format!(
                "CREATE UNIQUE INDEX IF NOT EXISTS {0}_user_normalized ON {0} (user_id, normalized)",
                self.table
            ))
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

            Ok(())
        }

        async fn embed(&self, text: &str) -> Result<Vec<f32>, MemoryError> {
            let v = self
                .embedder
                .embed(text)
                .await
                .map_err(MemoryError::Embedding)?;
            if v.is_empty() {
                return Err(MemoryError::Embedding("empty embedding".to_string()));
            }
            Ok(v)
        }

        fn row_to_record(row: &sqlx::postgres::PgRow, user_id: &str) -> Result<MemoryRecord, MemoryError> {
            let score: f64 = row.try_get("score").map_err(db_err)?;
            let created_at: DateTime<Utc> = row.try_get("created_at").map_err(db_err)?;
            Ok(MemoryRecord {
                id: row.try_get("id").map_err(db_err)?,
                text: row.try_get("memory").map_err(db_err)?,
                owner: user_id.to_string(),
                score: score as f32,
                created_at,
            })
        }
    }

    #[async_trait]
    impl MemoryBackend for PgVectorMemory {
        async fn search(
            &self,
            query: &str,
            user_id: &str,
            limit: usize,
        ) -> Result<Vec<MemoryRecord>, MemoryError> {
            let rows = if query.trim().is_empty() {
                sqlx::query(&format!(
                    "SELECT id, memory, created_at, 1.0::float8 AS score FROM {}
                     WHERE user_id = $1 ORDER BY created_at DESC LIMIT $2",
                    self.table
                ))
                .bind(user_id)
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await
                .map_err(db_err)?
            } else {
                let embedding = vector_literal(&self.embed(query).await?);
                sqlx::query(&format!(
                    "SELECT id, memory, created_at, (1 - (embedding <=> $2::vector))::float8 AS score
                     FROM {} WHERE user_id = $1 ORDER BY embedding <=> $2::vector LIMIT $3",
                    self.table
                ))
                .bind(user_id)
                .bind(embedding)
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await
                .map_err(db_err)?
            };

            rows.iter().map(|r| Self::row_to_record(r, user_id)).collect()
        }

        async fn add(&self, exchange: &[Message], user_id: &str) -> Result<AddReport, MemoryError> {
            let mut report = AddReport::default();
            for message in exchange.iter().filter(|m| m.role == Role::User) {
                let text = message.content.trim();
                if text.is_empty() {
                    continue;
                }
                let embedding = vector_literal(&self.embed(text).await?);
                let id = uuid::Uuid::new_v4().to_string();
                let created_at = Utc::now();
                let result = sqlx::query(&format!(
                    "INSERT INTO {} (id, user_id, memory, normalized, embedding, created_at)
                     VALUES ($1, $2, $3, $4, $5::vector, $6)
                     ON CONFLICT (user_id, normalized) DO NOTHING",
                    self.table
                ))
                .bind(&id)
                .bind(user_id)
                .bind(text)
                .bind(normalize(text))
                .bind(embedding)
                .bind(created_at)
                .execute(&self.pool)
                .await
                .map_err(db_err)?;

                if result.rows_affected() == 0 {
                    report.reused += 1;
                } else {
                    report.added.push(MemoryRecord {
                        id,
                        text: text.to_string(),
                        owner: user_id.to_string(),
                        score: 1.0,
                        created_at,
                    });
                }
            }
            Ok(report)
        }

        async fn count(&self, user_id: &str, _probe: &CountProbe) -> Result<usize, MemoryError> {
            let row = sqlx::query(&format!(
                "SELECT COUNT(*) AS n FROM {} WHERE user_id = $1",
                self.table
            ))
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
            let n: i64 = row.try_get("n").map_err(db_err)?;
            Ok(n.max(0) as usize)
        }

        fn name(&self) -> &str {
            "pgvector"
        }
    }

}

#[cfg(feature = "pgvector")]
pub use sqlx_impl::{valid_collection_name, PgVectorMemory};
