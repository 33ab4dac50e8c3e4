//! 核心层：单轮对话编排、初始化与配置期错误

pub mod builder;
pub mod error;
pub mod turn;

pub use builder::{create_llm, create_memory, setup, Backends, TurnOrchestratorBuilder};
pub use error::ConfigError;
pub use turn::{
    compose_system_prompt, preview, resolve_user_id, run_turn, Persistence, TurnConfig,
    TurnOrchestrator, TurnRequest, TurnResult, DEFAULT_ASSISTANT_PROMPT, DEFAULT_SEARCH_LIMIT,
    DEFAULT_USER_ID, GENERATION_FAILURE_PREFIX,
};
