//! 单轮对话流水线集成测试：用可编排的假后端覆盖各阶段的成功 / 失败组合

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;

use memchat::core::{
    ConfigError, Persistence, TurnConfig, TurnOrchestrator, TurnRequest, DEFAULT_USER_ID,
    GENERATION_FAILURE_PREFIX,
};
use memchat::llm::{LlmClient, LlmError};
use memchat::memory::{
    AddReport, CountProbe, MemoryBackend, MemoryError, MemoryRecord, Message, Role,
};
use memchat::run_turn;

/// 固定回复或固定失败的 LLM，记录收到的消息
struct ScriptedLlm {
    reply: Result<String, String>,
    calls: AtomicUsize,
    last_messages: Mutex<Vec<Message>>,
}

impl ScriptedLlm {
    fn replying(text: &str) -> Self {
        Self {
            reply: Ok(text.to_string()),
            calls: AtomicUsize::new(0),
            last_messages: Mutex::new(Vec::new()),
        }
    }

    fn failing(cause: &str) -> Self {
        Self {
            reply: Err(cause.to_string()),
            ..Self::replying("")
        }
    }

    fn system_prompt(&self) -> String {
        self.last_messages
            .lock()
            .unwrap()
            .iter()
            .find(|m| m.role == Role::System)
            .map(|m| m.content.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_messages.lock().unwrap() = messages.to_vec();
        self.reply.clone().map_err(LlmError::Api)
    }

    fn model(&self) -> &str {
        "scripted"
    }
}

/// 预置检索结果的记忆后端；各操作可单独切换为失败
#[derive(Default)]
struct ScriptedMemory {
    found: Vec<String>,
    fail_search: bool,
    fail_add: bool,
    fail_count: bool,
    /// add 成功但不增加计数（模拟去重）
    dedup: bool,
    stored: AtomicUsize,
    add_calls: AtomicUsize,
    search_users: Mutex<Vec<String>>,
    add_users: Mutex<Vec<String>>,
    exchange_roles: Mutex<Vec<Role>>,
    flushed: AtomicBool,
}

impl ScriptedMemory {
    fn with_memories(texts: &[&str]) -> Self {
        Self {
            found: texts.iter().map(|t| t.to_string()).collect(),
            ..Self::default()
        }
    }
}

#[async_trait]
impl MemoryBackend for ScriptedMemory {
    async fn search(
        &self,
        _query: &str,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<MemoryRecord>, MemoryError> {
        self.search_users.lock().unwrap().push(user_id.to_string());
        if self.fail_search {
            return Err(MemoryError::Connection("search unavailable".to_string()));
        }
        Ok(self
            .found
            .iter()
            .take(limit)
            .enumerate()
            .map(|(i, text)| MemoryRecord {
                id: format!("m{i}"),
                text: text.clone(),
                owner: user_id.to_string(),
                score: 0.9 - i as f32 * 0.1,
                created_at: Utc::now(),
            })
            .collect())
    }

    async fn add(&self, exchange: &[Message], user_id: &str) -> Result<AddReport, MemoryError> {
        self.add_calls.fetch_add(1, Ordering::SeqCst);
        self.add_users.lock().unwrap().push(user_id.to_string());
        *self.exchange_roles.lock().unwrap() = exchange.iter().map(|m| m.role).collect();
        if self.fail_add {
            return Err(MemoryError::Storage("disk full".to_string()));
        }
        if self.dedup {
            return Ok(AddReport {
                added: Vec::new(),
                reused: 1,
            });
        }
        self.stored.fetch_add(1, Ordering::SeqCst);
        Ok(AddReport::default())
    }

    async fn count(&self, _user_id: &str, _probe: &CountProbe) -> Result<usize, MemoryError> {
        if self.fail_count {
            return Err(MemoryError::Connection("count unavailable".to_string()));
        }
        Ok(self.stored.load(Ordering::SeqCst))
    }

    async fn flush(&self) -> Result<(), MemoryError> {
        self.flushed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

fn orchestrator(llm: Arc<ScriptedLlm>, memory: Arc<ScriptedMemory>) -> TurnOrchestrator {
    TurnOrchestrator::builder()
        .llm(llm)
        .memory(memory)
        .config(TurnConfig::default())
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_end_to_end_example() {
    let llm = ScriptedLlm::replying("You are Maria, an engineer.");
    let memory = ScriptedMemory::with_memories(&["Name is Maria", "Works as engineer"]);

    let response = run_turn("Who am I?", "u1", &llm, &memory).await;

    assert_eq!(response, "You are Maria, an engineer.");
    assert_eq!(memory.add_calls.load(Ordering::SeqCst), 1);
    assert_eq!(llm.calls.load(Ordering::SeqCst), 1);

    let prompt = llm.system_prompt();
    assert!(prompt.contains("- Name is Maria\n- Works as engineer"));
    assert_eq!(
        *memory.exchange_roles.lock().unwrap(),
        vec![Role::System, Role::User, Role::Assistant]
    );
}

#[tokio::test]
async fn test_always_returns_a_response() {
    for fail_search in [false, true] {
        for fail_llm in [false, true] {
            for fail_add in [false, true] {
                for fail_count in [false, true] {
                    let llm = if fail_llm {
                        ScriptedLlm::failing("down")
                    } else {
                        ScriptedLlm::replying("ok")
                    };
                    let memory = ScriptedMemory {
                        fail_search,
                        fail_add,
                        fail_count,
                        ..ScriptedMemory::with_memories(&["fact"])
                    };
                    let response = run_turn("hello", "u1", &llm, &memory).await;
                    if fail_llm {
                        assert!(response.starts_with(GENERATION_FAILURE_PREFIX));
                    } else {
                        assert_eq!(response, "ok");
                    }
                }
            }
        }
    }
}

#[tokio::test]
async fn test_search_failure_matches_zero_memories() {
    let llm_failed = ScriptedLlm::replying("answer");
    let failing = ScriptedMemory {
        fail_search: true,
        ..ScriptedMemory::with_memories(&["ignored"])
    };
    let degraded = run_turn("hi", "u1", &llm_failed, &failing).await;

    let llm_empty = ScriptedLlm::replying("answer");
    let empty = ScriptedMemory::default();
    let baseline = run_turn("hi", "u1", &llm_empty, &empty).await;

    assert_eq!(degraded, baseline);
    assert_eq!(llm_failed.system_prompt(), llm_empty.system_prompt());
    assert!(llm_failed.system_prompt().contains("(no relevant memories found)"));
    assert_eq!(failing.add_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_generation_failure_is_marked() {
    let llm = Arc::new(ScriptedLlm::failing("boom"));
    let memory = Arc::new(ScriptedMemory::with_memories(&["fact"]));
    let result = orchestrator(llm, Arc::clone(&memory))
        .handle(TurnRequest::new("hi", "u1"))
        .await;

    assert!(result.response.starts_with(GENERATION_FAILURE_PREFIX));
    assert!(result.response.contains("boom"));
    assert!(result.generation_failed);
    assert!(!result.memory_written);
    assert_eq!(result.persistence, Persistence::Skipped);
    assert_eq!(memory.add_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_add_failure_is_invisible() {
    let llm = Arc::new(ScriptedLlm::replying("reply"));
    let memory = Arc::new(ScriptedMemory {
        fail_add: true,
        ..ScriptedMemory::default()
    });
    let result = orchestrator(llm, Arc::clone(&memory))
        .handle(TurnRequest::new("hi", "u1"))
        .await;

    assert_eq!(result.response, "reply");
    assert!(!result.memory_written);
    assert_eq!(result.persistence, Persistence::Failed);

    let ok_memory = ScriptedMemory::default();
    let baseline = run_turn("hi", "u1", &ScriptedLlm::replying("reply"), &ok_memory).await;
    assert_eq!(result.response, baseline);
}

#[tokio::test]
async fn test_blank_user_id_uses_default() {
    let llm = ScriptedLlm::replying("r");
    let blank = ScriptedMemory::default();
    let explicit = ScriptedMemory::default();

    let a = run_turn("hi", "", &llm, &blank).await;
    let b = run_turn("hi", DEFAULT_USER_ID, &llm, &explicit).await;

    assert_eq!(a, b);
    assert_eq!(*blank.search_users.lock().unwrap(), vec![DEFAULT_USER_ID.to_string()]);
    assert_eq!(*blank.add_users.lock().unwrap(), vec![DEFAULT_USER_ID.to_string()]);
    assert_eq!(
        *blank.search_users.lock().unwrap(),
        *explicit.search_users.lock().unwrap()
    );
}

#[tokio::test]
async fn test_change_detection() {
    let llm = Arc::new(ScriptedLlm::replying("r"));

    let fresh = Arc::new(ScriptedMemory::default());
    let result = orchestrator(Arc::clone(&llm), fresh)
        .handle(TurnRequest::new("I like tea", "u1"))
        .await;
    assert_eq!(result.persistence, Persistence::Stored);

    let dedup = Arc::new(ScriptedMemory {
        dedup: true,
        ..ScriptedMemory::default()
    });
    let result = orchestrator(Arc::clone(&llm), dedup)
        .handle(TurnRequest::new("I like tea", "u1"))
        .await;
    assert_eq!(result.persistence, Persistence::Reused);
    assert!(result.memory_written);

    // 计数失败时按「已写入」处理
    let no_count = Arc::new(ScriptedMemory {
        dedup: true,
        fail_count: true,
        ..ScriptedMemory::default()
    });
    let result = orchestrator(llm, no_count)
        .handle(TurnRequest::new("I like tea", "u1"))
        .await;
    assert_eq!(result.persistence, Persistence::Stored);
    assert_eq!(result.response, "r");
}

#[tokio::test]
async fn test_new_fact_at_capacity_is_stored() {
    use memchat::memory::{LocalMemory, LocalMemoryConfig};

    let memory = Arc::new(LocalMemory::new(
        LocalMemoryConfig {
            max_entries_per_user: 1,
            snapshot_dir: None,
        },
        None,
    ));
    let orchestrator = TurnOrchestrator::builder()
        .llm(Arc::new(ScriptedLlm::replying("r")))
        .memory(memory.clone())
        .build()
        .unwrap();

    let first = orchestrator.handle(TurnRequest::new("I like tea", "u1")).await;
    assert_eq!(first.persistence, Persistence::Stored);

    // 计数仍为 1（最旧的被淘汰），但新事实已写入
    let second = orchestrator
        .handle(TurnRequest::new("I work at a bank", "u1"))
        .await;
    assert_eq!(second.persistence, Persistence::Stored);

    let stored = memory.search("", "u1", 10).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].text, "I work at a bank");

    let repeat = orchestrator
        .handle(TurnRequest::new("I work at a bank", "u1"))
        .await;
    assert_eq!(repeat.persistence, Persistence::Reused);
}

#[tokio::test]
async fn test_retrieved_count_and_limit() {
    let llm = Arc::new(ScriptedLlm::replying("r"));
    let memory = Arc::new(ScriptedMemory::with_memories(&["a", "b", "c", "d", "e", "f", "g"]));
    let result = orchestrator(Arc::clone(&llm), memory)
        .handle(TurnRequest::new("q", "u1"))
        .await;
    assert_eq!(result.retrieved, 5);
    assert_eq!(llm.system_prompt().matches("\n- ").count(), 5);
}

#[test]
fn test_builder_reports_missing_backend() {
    let err = TurnOrchestrator::builder()
        .llm(Arc::new(ScriptedLlm::replying("r")))
        .build()
        .err()
        .unwrap();
    assert!(matches!(err, ConfigError::MissingBackend("memory")));
    assert!(err.to_string().contains("memory"));

    let err = TurnOrchestrator::builder()
        .memory(Arc::new(ScriptedMemory::default()))
        .build()
        .err()
        .unwrap();
    assert!(matches!(err, ConfigError::MissingBackend("llm")));
}

#[tokio::test]
async fn test_assistant_shutdown_flushes() {
    use memchat::core::Backends;
    use memchat::Assistant;

    let memory = Arc::new(ScriptedMemory::default());
    let backends = Backends {
        llm: Arc::new(ScriptedLlm::replying("r")),
        memory: memory.clone(),
    };
    let assistant = Assistant::from_backends(&backends, TurnConfig::default());
    assistant.process_message("hello", "u1").await;
    assistant.shutdown().await;
    assert!(memory.flushed.load(Ordering::SeqCst));
}
