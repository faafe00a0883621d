pub mod assist;
pub mod db;
pub mod error;
pub mod llm;
pub mod models;
pub mod pages;
pub mod server;
pub mod session;
pub mod telemetry;

pub use error::ChatError;
pub use llm::{ChatBackend, LlmClient};
pub use models::{ConversationRequest, ProviderConfig, ProviderKind, Role, Turn};
pub use session::{ChatSession, Submission};

/**
 * \brief SDK 预导入集合，方便外部引用常用模块。
 */
pub mod prelude {
    pub use crate::assist;
    pub use crate::db;
    pub use crate::llm;
    pub use crate::models;
    pub use crate::pages;
    pub use crate::server;
    pub use crate::session;
    pub use crate::telemetry;
}
