use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio_util::sync::CancellationToken;

use crate::error::ChatError;
use crate::llm::ChatBackend;
use crate::models::{ConversationRequest, ProviderConfig, Turn};
use crate::telemetry;

/**
 * \brief 页面对话组件注入的系统提示前缀。
 */
pub const SYSTEM_PREFIX: &str = "You are a helpful AI assistant for database design.";

/**
 * \brief 一次提交的结果。
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    /** \brief 收到助手回复，已追加到会话记录。 */
    Replied(String),
    /** \brief 空输入或已有请求在途，未做任何改动。 */
    Ignored,
}

/**
 * \brief 单页面的对话会话：记录仅存活于内存，同一时刻至多一个在途请求。
 */
pub struct ChatSession {
    system_instruction: String,
    backend: Arc<dyn ChatBackend>,
    config: Mutex<Option<ProviderConfig>>,
    transcript: Mutex<Vec<Turn>>,
    pending: AtomicBool,
    cancel: Mutex<CancellationToken>,
}

/// Clears the pending flag even when the submit future is dropped mid-flight.
struct PendingGuard<'a>(&'a AtomicBool);

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ChatSession {
    /**
     * \brief 以页面上下文构造会话，系统提示为固定前缀加上下文。
     */
    pub fn new(context: &str, backend: Arc<dyn ChatBackend>) -> Self {
        let system_instruction = if context.trim().is_empty() {
            format!("{} ", SYSTEM_PREFIX)
        } else {
            format!("{} {}", SYSTEM_PREFIX, context)
        };
        Self {
            system_instruction,
            backend,
            config: Mutex::new(None),
            transcript: Mutex::new(Vec::new()),
            pending: AtomicBool::new(false),
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    pub fn system_instruction(&self) -> &str {
        &self.system_instruction
    }

    /**
     * \brief 更新配置；对在途请求无影响，下一次提交生效。
     */
    pub fn configure(&self, config: ProviderConfig) {
        *lock(&self.config) = Some(config);
    }

    pub fn clear_config(&self) {
        *lock(&self.config) = None;
    }

    pub fn config(&self) -> Option<ProviderConfig> {
        lock(&self.config).clone()
    }

    /**
     * \brief 当前会话记录的快照。
     */
    pub fn transcript(&self) -> Vec<Turn> {
        lock(&self.transcript).clone()
    }

    /**
     * \brief 清空会话记录；有在途请求时不做改动并返回 false。
     */
    pub fn clear_transcript(&self) -> bool {
        let mut transcript = lock(&self.transcript);
        if self.is_pending() {
            return false;
        }
        transcript.clear();
        true
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    /**
     * \brief 取消在途请求；没有在途请求时无效果。
     */
    pub fn cancel(&self) {
        lock(&self.cancel).cancel();
    }

    /**
     * \brief 提交一条用户消息。
     * \details 校验失败时不改动记录；通过后先乐观追加用户发言，
     *          成功则追加助手回复，失败则保留用户发言并返回错误。
     */
    pub async fn submit(&self, text: &str) -> Result<Submission, ChatError> {
        if text.trim().is_empty() || self.is_pending() {
            return Ok(Submission::Ignored);
        }

        let config = self.config().ok_or(ChatError::ConfigMissing)?;
        if let Err(e) = config.validate() {
            telemetry::log_error("session", &format!("rejected before dispatch: {}", e));
            return Err(e);
        }

        // Claim the pending flag and install the token under one lock so cancel() never misses it.
        let token = {
            let mut slot = lock(&self.cancel);
            if self
                .pending
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return Ok(Submission::Ignored);
            }
            *slot = CancellationToken::new();
            slot.clone()
        };
        let _pending = PendingGuard(&self.pending);

        let conversation = {
            let mut transcript = lock(&self.transcript);
            let conversation =
                ConversationRequest::new(&self.system_instruction, transcript.clone(), text);
            transcript.push(Turn::user(text));
            conversation
        };
        telemetry::log_event(
            "session",
            &format!(
                "submit provider={} history={} prompt_len={}",
                config.provider.as_str(),
                conversation.turns.len(),
                text.len()
            ),
        );

        let outcome = tokio::select! {
            _ = token.cancelled() => Err(ChatError::Cancelled),
            reply = self.backend.complete(&config, &conversation) => reply,
        };

        match outcome {
            Ok(reply) => {
                lock(&self.transcript).push(Turn::assistant(reply.clone()));
                Ok(Submission::Replied(reply))
            }
            Err(e) => {
                telemetry::log_error("session", &format!("exchange failed: {}", e));
                Err(e)
            }
        }
    }
}
