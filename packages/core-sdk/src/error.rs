use std::time::Duration;

use crate::models::ProviderKind;

/**
 * \brief 对话链路的统一错误类型。
 * \details 所有错误均在会话边界被恢复：转为一次性提示，会话回到空闲状态，不做自动重试。
 */
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("AI settings not found. Please configure your AI settings first.")]
    ConfigMissing,

    #[error("API key missing. Please add your API key in the settings.")]
    CredentialMissing,

    #[error("Custom API endpoint not specified")]
    EndpointMissing,

    #[error("invalid custom API endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("temperature {0} is outside the range 0.0..=1.0")]
    InvalidTemperature(f64),

    #[error("{provider} API error: {status} {body}")]
    ProviderError {
        provider: ProviderKind,
        status: u16,
        body: String,
    },

    #[error("malformed {provider} response: missing {path}")]
    MalformedResponse {
        provider: ProviderKind,
        path: &'static str,
    },

    #[error("Unsupported AI provider: {0}")]
    UnsupportedProvider(String),

    #[error("{0}")]
    MissingInput(&'static str),

    #[error("request timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("request cancelled")]
    Cancelled,

    #[error("network error: {0}")]
    Transport(String),
}

impl ChatError {
    /**
     * \brief 是否为发出网络请求之前即可判定的配置/输入错误。
     */
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            ChatError::ConfigMissing
                | ChatError::CredentialMissing
                | ChatError::EndpointMissing
                | ChatError::InvalidEndpoint(_)
                | ChatError::InvalidTemperature(_)
                | ChatError::UnsupportedProvider(_)
                | ChatError::MissingInput(_)
        )
    }

    /**
     * \brief 上游返回的 HTTP 状态码（若有）。
     */
    pub fn upstream_status(&self) -> Option<u16> {
        match self {
            ChatError::ProviderError { status, .. } => Some(*status),
            _ => None,
        }
    }
}
