//! Memchat - 带按用户长期记忆的对话助手
//!
//! 模块划分：
//! - **agent**: 无界面助手运行时（供 CLI / HTTP API 调用）
//! - **config**: 应用配置加载（TOML + 环境变量 + .env）
//! - **core**: 单轮对话编排（检索 → Prompt → 生成 → 写回）、初始化、配置期错误
//! - **diagnostics**: 环境与后端自检
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）与嵌入
//! - **memory**: 长期记忆后端抽象与实现（本地 / pgvector）
//! - **observability**: 日志初始化

pub mod agent;
pub mod config;
pub mod core;
pub mod diagnostics;
pub mod llm;
pub mod memory;
pub mod observability;

pub use agent::Assistant;
pub use core::{run_turn, TurnOrchestrator, TurnRequest, TurnResult};
