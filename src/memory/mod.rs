//! 记忆层：对话消息、长期记忆后端抽象与实现（本地 / pgvector）

pub mod backend;
pub mod conversation;
pub mod local;
pub mod pgvector;
pub mod tokenizer;

pub use backend::{AddReport, CountProbe, MemoryBackend, MemoryError, MemoryRecord};
pub use conversation::{last_user_content, Message, Role};
pub use local::{LocalMemory, LocalMemoryConfig};
#[cfg(feature = "pgvector")]
pub use pgvector::PgVectorMemory;
