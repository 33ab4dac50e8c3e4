//! 环境与后端自检（`memchat check`）
//!
//! check_environment 只看配置与环境变量，不发网络请求；
//! probe_backends 对已构建的后端做一次真实往返（记忆计数 + 可选的 LLM 调用）。

use std::fmt;

use crate::config::AppConfig;
use crate::core::builder::{embedding_api_key, resolve_key};
use crate::core::{Backends, DEFAULT_USER_ID};
use crate::memory::{CountProbe, Message};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    Ok,
    Warn,
    Fail,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CheckStatus::Ok => "OK",
            CheckStatus::Warn => "WARN",
            CheckStatus::Fail => "FAIL",
        };
        f.write_str(s)
    }
}

/// 一项检查结果
#[derive(Debug, Clone)]
pub struct CheckItem {
    pub name: String,
    pub status: CheckStatus,
    pub detail: String,
}

impl CheckItem {
    fn new(name: &str, status: CheckStatus, detail: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            status,
            detail: detail.into(),
        }
    }
}

/// 是否存在 Fail 项
pub fn has_failures(items: &[CheckItem]) -> bool {
    items.iter().any(|i| i.status == CheckStatus::Fail)
}

/// 连接串脱敏：去掉 user:password@ 中的密码
fn redact_url(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            let creds = &url[scheme_end + 3..at];
            let user = creds.split(':').next().unwrap_or("");
            format!("{}{}:***{}", &url[..scheme_end + 3], user, &url[at..])
        }
        _ => url.to_string(),
    }
}

/// 检查配置：必需项缺失为 Fail，可选项缺失为 Warn
pub fn check_environment(cfg: &AppConfig) -> Vec<CheckItem> {
    let mut items = Vec::new();
    let provider = cfg.llm.provider.to_lowercase();

    let key_item = match provider.as_str() {
        "mock" => CheckItem::new("llm api key", CheckStatus::Ok, "not required for mock provider"),
        "deepseek" => match resolve_key(cfg.llm.api_key.as_deref(), &["DEEPSEEK_API_KEY", "OPENAI_API_KEY"]) {
            Some(_) => CheckItem::new("llm api key", CheckStatus::Ok, "DEEPSEEK_API_KEY set"),
            None => CheckItem::new("llm api key", CheckStatus::Fail, "DEEPSEEK_API_KEY is not set"),
        },
        "openai" => match resolve_key(cfg.llm.api_key.as_deref(), &["OPENAI_API_KEY"]) {
            Some(_) => CheckItem::new("llm api key", CheckStatus::Ok, "OPENAI_API_KEY set"),
            None => CheckItem::new("llm api key", CheckStatus::Fail, "OPENAI_API_KEY is not set"),
        },
        other => CheckItem::new("llm provider", CheckStatus::Fail, format!("unknown provider '{other}'")),
    };
    items.push(key_item);
    items.push(CheckItem::new(
        "llm model",
        CheckStatus::Ok,
        format!("{} via {}", cfg.llm.model, cfg.llm.provider),
    ));

    match cfg.memory.provider.to_lowercase().as_str() {
        "local" => {
            let detail = match &cfg.memory.snapshot_dir {
                Some(dir) => format!("snapshots in {}", dir.display()),
                None => "in-memory only, memories are lost on exit".to_string(),
            };
            let status = if cfg.memory.snapshot_dir.is_some() {
                CheckStatus::Ok
            } else {
                CheckStatus::Warn
            };
            items.push(CheckItem::new("memory backend", status, detail));
            if cfg.memory.embeddings && embedding_api_key(cfg).is_none() {
                items.push(CheckItem::new(
                    "embeddings",
                    CheckStatus::Warn,
                    "no OPENAI_API_KEY, falling back to keyword retrieval",
                ));
            }
        }
        "pgvector" => {
            if !cfg!(feature = "pgvector") {
                items.push(CheckItem::new(
                    "memory backend",
                    CheckStatus::Fail,
                    "pgvector requires building with --features pgvector",
                ));
            }
            match cfg.memory.database_url.as_deref().filter(|u| !u.trim().is_empty()) {
                Some(url) => items.push(CheckItem::new(
                    "database url",
                    CheckStatus::Ok,
                    format!("{} (collection {})", redact_url(url), cfg.memory.collection),
                )),
                None => items.push(CheckItem::new(
                    "database url",
                    CheckStatus::Fail,
                    "DATABASE_URL is not set",
                )),
            }
            // pgvector 必须有嵌入，不能退化为关键词检索
            match embedding_api_key(cfg) {
                Some(_) => items.push(CheckItem::new(
                    "embeddings",
                    CheckStatus::Ok,
                    format!("{} via OpenAI", cfg.memory.embedding_model),
                )),
                None => items.push(CheckItem::new(
                    "embeddings",
                    CheckStatus::Fail,
                    "pgvector needs OPENAI_API_KEY for embeddings",
                )),
            }
        }
        other => items.push(CheckItem::new(
            "memory backend",
            CheckStatus::Fail,
            format!("unknown provider '{other}'"),
        )),
    }

    if cfg.app.log_file.is_none() {
        items.push(CheckItem::new("log file", CheckStatus::Warn, "not configured, logging to stderr only"));
    }

    items
}

/// 对后端做真实往返；call_llm 为 true 时额外发一次最小补全请求
pub async fn probe_backends(backends: &Backends, call_llm: bool) -> Vec<CheckItem> {
    let mut items = Vec::new();

    match backends
        .memory
        .count(DEFAULT_USER_ID, &CountProbe::default())
        .await
    {
        Ok(n) => items.push(CheckItem::new(
            "memory connection",
            CheckStatus::Ok,
            format!("{} reachable ({} memories for {})", backends.memory.name(), n, DEFAULT_USER_ID),
        )),
        Err(e) => items.push(CheckItem::new("memory connection", CheckStatus::Fail, e.to_string())),
    }

    if call_llm {
        match backends.llm.complete(&[Message::user("ping")]).await {
            Ok(_) => items.push(CheckItem::new(
                "llm connection",
                CheckStatus::Ok,
                format!("{} responded", backends.llm.model()),
            )),
            Err(e) => items.push(CheckItem::new("llm connection", CheckStatus::Fail, e.to_string())),
        }
    }

    items
}
