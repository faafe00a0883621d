use std::fmt;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::Url;
use serde_json::{json, Value};

use crate::error::ChatError;
use crate::models::{ConversationRequest, ProviderConfig, ProviderKind, REDACTED};
use crate::telemetry;

pub const MISTRAL_API_BASE: &str = "https://api.mistral.ai";
pub const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

const CUSTOM_EMPTY_REPLY: &str = "No response from API";
const OPENAI_CONTENT_PATH: &str = "choices[0].message.content";
const GEMINI_TEXT_PATH: &str = "candidates[0].content.parts[0].text";

/**
 * \brief 对话补全能力：会话控制器只依赖该接口，与具体服务无关。
 */
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn complete(
        &self,
        config: &ProviderConfig,
        conversation: &ConversationRequest,
    ) -> Result<String, ChatError>;
}

/**
 * \brief 各服务的基地址，测试或代理场景可覆盖。
 */
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub mistral_base: String,
    pub gemini_base: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            mistral_base: MISTRAL_API_BASE.to_string(),
            gemini_base: GEMINI_API_BASE.to_string(),
        }
    }
}

/**
 * \brief 构造完成、尚未发送的请求。
 */
#[derive(Clone)]
pub struct OutboundRequest {
    pub url: Url,
    /** \brief Bearer 令牌；Gemini 走查询串，此处为空。 */
    pub bearer: Option<String>,
    pub body: Value,
}

impl fmt::Debug for OutboundRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut shown = self.url.clone();
        shown.set_query(None);
        f.debug_struct("OutboundRequest")
            .field("url", &shown.as_str())
            .field("bearer", &self.bearer.as_ref().map(|_| REDACTED))
            .field("body", &self.body)
            .finish()
    }
}

/**
 * \brief 模型服务适配器：一次发送只尝试一次，不做重试。
 */
#[derive(Debug, Clone)]
pub struct LlmClient {
    http: reqwest::Client,
    endpoints: Endpoints,
    timeout: Duration,
}

impl LlmClient {
    /**
     * \brief 使用默认基地址与超时构造。
     */
    pub fn new() -> Result<Self> {
        Self::with_endpoints(Endpoints::default(), DEFAULT_TIMEOUT)
    }

    pub fn with_endpoints(endpoints: Endpoints, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            endpoints,
            timeout,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /**
     * \brief 按服务类型构造请求；配置不合法时直接失败，不产生任何网络调用。
     */
    pub fn build_request(
        &self,
        config: &ProviderConfig,
        conversation: &ConversationRequest,
    ) -> Result<OutboundRequest, ChatError> {
        config.validate()?;
        match config.provider {
            ProviderKind::Mistral => {
                let url = parse_url(&format!(
                    "{}/v1/chat/completions",
                    self.endpoints.mistral_base.trim_end_matches('/')
                ))?;
                Ok(OutboundRequest {
                    url,
                    bearer: Some(config.api_key.clone()),
                    body: openai_body(config, conversation),
                })
            }
            ProviderKind::Gemini => {
                let mut url = parse_url(&format!(
                    "{}/v1/models/{}:generateContent",
                    self.endpoints.gemini_base.trim_end_matches('/'),
                    config.model
                ))?;
                url.query_pairs_mut().append_pair("key", &config.api_key);
                Ok(OutboundRequest {
                    url,
                    bearer: None,
                    body: gemini_body(config, conversation),
                })
            }
            ProviderKind::Custom => {
                let url = parse_url(config.endpoint()?)?;
                Ok(OutboundRequest {
                    url,
                    bearer: Some(config.api_key.clone()),
                    body: openai_body(config, conversation),
                })
            }
        }
    }

    async fn dispatch(
        &self,
        provider: ProviderKind,
        request: OutboundRequest,
    ) -> Result<Value, ChatError> {
        let mut builder = self
            .http
            .post(request.url)
            .header(CONTENT_TYPE, "application/json")
            .json(&request.body);
        if let Some(token) = &request.bearer {
            builder = builder.header(AUTHORIZATION, format!("Bearer {}", token));
        }

        let resp = builder.send().await.map_err(|e| self.transport_err(e))?;
        let status = resp.status();
        let text = resp.text().await.map_err(|e| self.transport_err(e))?;

        if !status.is_success() {
            return Err(ChatError::ProviderError {
                provider,
                status: status.as_u16(),
                body: text,
            });
        }
        serde_json::from_str(&text).map_err(|_| ChatError::MalformedResponse {
            provider,
            path: "JSON body",
        })
    }

    fn transport_err(&self, err: reqwest::Error) -> ChatError {
        if err.is_timeout() {
            ChatError::Timeout(self.timeout)
        } else {
            ChatError::Transport(err.without_url().to_string())
        }
    }
}

#[async_trait]
impl ChatBackend for LlmClient {
    async fn complete(
        &self,
        config: &ProviderConfig,
        conversation: &ConversationRequest,
    ) -> Result<String, ChatError> {
        let request = self.build_request(config, conversation)?;
        telemetry::log_event(
            "llm",
            &format!(
                "dispatch provider={} model={} turns={}",
                config.provider.as_str(),
                config.model,
                conversation.turns.len()
            ),
        );

        let result = match self.dispatch(config.provider, request).await {
            Ok(value) => extract_reply(config.provider, &value),
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            telemetry::log_error(
                "llm",
                &format!("provider={} failed: {}", config.provider.as_str(), e),
            );
        }
        result
    }
}

/**
 * \brief 从各服务的响应中取出助手文本。
 * \details custom 类型依次尝试 OpenAI 路径、顶层 `response` 字段，都没有时返回占位文本而非报错。
 */
pub fn extract_reply(provider: ProviderKind, v: &Value) -> Result<String, ChatError> {
    match provider {
        ProviderKind::Mistral => string_at(v, "/choices/0/message/content")
            .map(str::to_string)
            .ok_or(ChatError::MalformedResponse {
                provider,
                path: OPENAI_CONTENT_PATH,
            }),
        ProviderKind::Gemini => string_at(v, "/candidates/0/content/parts/0/text")
            .map(str::to_string)
            .ok_or(ChatError::MalformedResponse {
                provider,
                path: GEMINI_TEXT_PATH,
            }),
        ProviderKind::Custom => Ok(string_at(v, "/choices/0/message/content")
            .filter(|s| !s.is_empty())
            .or_else(|| string_at(v, "/response").filter(|s| !s.is_empty()))
            .unwrap_or(CUSTOM_EMPTY_REPLY)
            .to_string()),
    }
}

fn string_at<'a>(v: &'a Value, pointer: &str) -> Option<&'a str> {
    v.pointer(pointer).and_then(Value::as_str)
}

fn openai_body(config: &ProviderConfig, conversation: &ConversationRequest) -> Value {
    json!({
        "model": config.model,
        "messages": conversation.messages(),
        "temperature": config.temperature,
    })
}

fn gemini_body(config: &ProviderConfig, conversation: &ConversationRequest) -> Value {
    // one-shot generation sends the prompt alone; chat keeps the system message in contents
    let contents: Vec<Value> = conversation
        .messages()
        .into_iter()
        .filter(|msg| !(conversation.one_shot && msg.role == "system"))
        .map(|msg| {
            let role = if msg.role == "assistant" {
                "model".to_string()
            } else {
                msg.role
            };
            json!({
                "role": role,
                "parts": [{"text": msg.content}]
            })
        })
        .collect();
    json!({
        "contents": contents,
        "generationConfig": {
            "temperature": config.temperature,
        },
    })
}

fn parse_url(raw: &str) -> Result<Url, ChatError> {
    Url::parse(raw).map_err(|e| ChatError::InvalidEndpoint(format!("{}: {}", raw, e)))
}
