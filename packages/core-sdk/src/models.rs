use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ChatError;

/**
 * \brief 会话记录中的发言角色。
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/**
 * \brief 一轮发言；追加后不可变。
 */
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/**
 * \brief 消息结构，与 OpenAI Chat 消息格式对齐（role 可为 system/user/assistant）。
 */
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /** \brief 角色 */
    pub role: String,
    /** \brief 内容 */
    pub content: String,
}

/**
 * \brief 支持的模型服务类型。
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /** \brief OpenAI 风格 REST 接口（Mistral）。 */
    #[default]
    Mistral,
    /** \brief Gemini generateContent 接口。 */
    Gemini,
    /** \brief 用户自定义端点，假定兼容 OpenAI。 */
    Custom,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 3] = [
        ProviderKind::Mistral,
        ProviderKind::Gemini,
        ProviderKind::Custom,
    ];

    /**
     * \brief 持久化使用的小写标识。
     */
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::Mistral => "mistral",
            ProviderKind::Gemini => "gemini",
            ProviderKind::Custom => "custom",
        }
    }

    /**
     * \brief 设置界面提供的候选模型，第一个为切换后的默认值。
     */
    pub fn model_options(self) -> &'static [&'static str] {
        match self {
            ProviderKind::Mistral => &[
                "mistral-small-latest",
                "mistral-medium-latest",
                "mistral-large-latest",
                "pixtral-large-latest",
            ],
            ProviderKind::Gemini => &[
                "gemini-2.0-flash",
                "gemini-2.0-flash-exp",
                "gemini-2.0-pro",
                "gemini-2.0-pro-exp",
            ],
            ProviderKind::Custom => &["custom-model"],
        }
    }

    pub fn default_model(self) -> &'static str {
        self.model_options()[0]
    }

    /**
     * \brief 获取 API Key 的提示文案。
     */
    pub fn key_help(self) -> &'static str {
        match self {
            ProviderKind::Mistral => {
                "Get your Mistral API key from https://console.mistral.ai/api-keys/"
            }
            ProviderKind::Gemini => {
                "Get your Gemini API key from https://aistudio.google.com/app/apikey"
            }
            ProviderKind::Custom => "Enter your custom API provider's API key",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ProviderKind::Mistral => "Mistral",
            ProviderKind::Gemini => "Gemini",
            ProviderKind::Custom => "Custom",
        };
        f.write_str(label)
    }
}

impl FromStr for ProviderKind {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mistral" => Ok(ProviderKind::Mistral),
            "gemini" => Ok(ProviderKind::Gemini),
            "custom" => Ok(ProviderKind::Custom),
            other => Err(ChatError::UnsupportedProvider(other.to_string())),
        }
    }
}

/** \brief 对外展示时替代 API Key 的掩码。 */
pub const REDACTED: &str = "********";

fn default_temperature() -> f64 {
    0.7
}

/**
 * \brief 模型服务配置，序列化形状与设置表单保存的 JSON 一致。
 */
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    /** \brief 服务类型 */
    pub provider: ProviderKind,
    /** \brief API Key（敏感字段，不进入日志与 Debug 输出） */
    #[serde(default)]
    pub api_key: String,
    /** \brief 模型名 */
    #[serde(default)]
    pub model: String,
    /** \brief 采样温度，取值 [0, 1] */
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /** \brief 自定义端点，仅 custom 类型必填 */
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_endpoint: Option<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Mistral,
            api_key: String::new(),
            model: ProviderKind::Mistral.default_model().to_string(),
            temperature: default_temperature(),
            custom_endpoint: None,
        }
    }
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("provider", &self.provider)
            .field("api_key", &redact(&self.api_key))
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("custom_endpoint", &self.custom_endpoint)
            .finish()
    }
}

impl ProviderConfig {
    /**
     * \brief 按给定类型构造配置，模型取该类型的默认候选。
     */
    pub fn new(provider: ProviderKind, api_key: impl Into<String>) -> Self {
        Self {
            provider,
            api_key: api_key.into(),
            model: provider.default_model().to_string(),
            ..Self::default()
        }
    }

    /**
     * \brief 切换服务类型，同时把模型重置为新类型的第一个候选。
     */
    pub fn switch_provider(&mut self, provider: ProviderKind) {
        self.provider = provider;
        self.model = provider.default_model().to_string();
    }

    /**
     * \brief 发起请求前的校验：Key 非空、温度合法、custom 类型端点存在且可解析。
     */
    pub fn validate(&self) -> Result<(), ChatError> {
        if self.api_key.trim().is_empty() {
            return Err(ChatError::CredentialMissing);
        }
        if !(0.0..=1.0).contains(&self.temperature) {
            return Err(ChatError::InvalidTemperature(self.temperature));
        }
        if self.provider == ProviderKind::Custom {
            let endpoint = self.endpoint()?;
            let url = reqwest::Url::parse(endpoint)
                .map_err(|e| ChatError::InvalidEndpoint(format!("{}: {}", endpoint, e)))?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(ChatError::InvalidEndpoint(format!(
                    "{}: expected an http or https URL",
                    endpoint
                )));
            }
        }
        Ok(())
    }

    /**
     * \brief 返回去除空白后的自定义端点。
     */
    pub fn endpoint(&self) -> Result<&str, ChatError> {
        self.custom_endpoint
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .ok_or(ChatError::EndpointMissing)
    }

    /**
     * \brief 从持久化的 JSON 恢复配置。
     * \details 未保存或无法解析视为未配置；provider 标签未知时返回 UnsupportedProvider。
     */
    pub fn from_stored(stored: Option<Value>) -> Result<Self, ChatError> {
        let value = stored
            .filter(|v| !v.is_null())
            .ok_or(ChatError::ConfigMissing)?;
        if let Some(tag) = value.get("provider").and_then(Value::as_str) {
            tag.parse::<ProviderKind>()?;
        }
        let mut config: Self =
            serde_json::from_value(value).map_err(|_| ChatError::ConfigMissing)?;
        if config.model.trim().is_empty() {
            config.model = config.provider.default_model().to_string();
        }
        Ok(config)
    }

    /**
     * \brief 对外展示用的副本，API Key 被掩码。
     */
    pub fn redacted(&self) -> Self {
        Self {
            api_key: redact(&self.api_key),
            ..self.clone()
        }
    }
}

fn redact(secret: &str) -> String {
    if secret.is_empty() {
        String::new()
    } else {
        REDACTED.to_string()
    }
}

/**
 * \brief 单次发送构造的临时会话请求，响应后即丢弃。
 */
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationRequest {
    pub system_instruction: String,
    pub turns: Vec<Turn>,
    pub pending_user_text: String,
    /** \brief 一次性生成请求；Gemini 请求体此时只携带用户发言。 */
    pub one_shot: bool,
}

impl ConversationRequest {
    pub fn new(
        system_instruction: impl Into<String>,
        turns: Vec<Turn>,
        pending_user_text: impl Into<String>,
    ) -> Self {
        Self {
            system_instruction: system_instruction.into(),
            turns,
            pending_user_text: pending_user_text.into(),
            one_shot: false,
        }
    }

    /**
     * \brief 无历史记录的一次性请求，用于页面级生成助手。
     */
    pub fn single(system_instruction: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            one_shot: true,
            ..Self::new(system_instruction, Vec::new(), prompt)
        }
    }

    /**
     * \brief 展开为 `[system, ...turns, user]` 的扁平消息数组。
     */
    pub fn messages(&self) -> Vec<Message> {
        let mut out = Vec::with_capacity(self.turns.len() + 2);
        out.push(Message {
            role: "system".to_string(),
            content: self.system_instruction.clone(),
        });
        out.extend(self.turns.iter().map(|t| Message {
            role: t.role.as_str().to_string(),
            content: t.content.clone(),
        }));
        out.push(Message {
            role: Role::User.as_str().to_string(),
            content: self.pending_user_text.clone(),
        });
        out
    }
}
