use std::str::FromStr;

use anyhow::Result;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::error::ChatError;
use crate::llm::ChatBackend;
use crate::models::{ConversationRequest, ProviderConfig};
use crate::{pages, telemetry};

/**
 * \brief 一次性生成助手使用的系统提示。
 */
pub const ASSIST_SYSTEM: &str = "You are a helpful database design assistant.";

/** \brief 生成建表语句时使用的系统提示。 */
pub const SQL_SYSTEM: &str = "You are a database expert who specializes in SQL. Generate clean, well-formatted SQL code with appropriate comments.";

/**
 * \brief 可由模型生成的草稿类型。
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionKind {
    Entities,
    Attributes,
    Relationships,
    Tables,
}

impl SuggestionKind {
    /**
     * \brief 生成结果写入的草稿键。
     */
    pub fn target_key(self) -> &'static str {
        match self {
            SuggestionKind::Entities => "requirements_entities",
            SuggestionKind::Attributes => "requirements_attributes",
            SuggestionKind::Relationships => "requirements_relationships",
            SuggestionKind::Tables => "logical_tables",
        }
    }

    pub fn system_instruction(self) -> &'static str {
        match self {
            SuggestionKind::Tables => SQL_SYSTEM,
            _ => ASSIST_SYSTEM,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SuggestionKind::Entities => "entities",
            SuggestionKind::Attributes => "attributes",
            SuggestionKind::Relationships => "relationships",
            SuggestionKind::Tables => "tables",
        }
    }
}

impl FromStr for SuggestionKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "entities" => Ok(SuggestionKind::Entities),
            "attributes" => Ok(SuggestionKind::Attributes),
            "relationships" => Ok(SuggestionKind::Relationships),
            "tables" => Ok(SuggestionKind::Tables),
            other => anyhow::bail!("unknown suggestion kind: {}", other),
        }
    }
}

/**
 * \brief 生成提示所需的已保存草稿。
 */
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DesignInputs {
    pub entities: String,
    pub attributes: String,
    pub relationships: String,
    pub schema: String,
}

impl DesignInputs {
    pub fn load(conn: &Connection) -> Result<Self> {
        Ok(Self {
            entities: pages::load_note(conn, "requirements_entities")?,
            attributes: pages::load_note(conn, "requirements_attributes")?,
            relationships: pages::load_note(conn, "requirements_relationships")?,
            schema: pages::load_note(conn, "logical_schema")?,
        })
    }

    /**
     * \brief 以调用方尚未保存的草稿覆盖已保存值。
     */
    pub fn with_drafts(mut self, drafts: DesignDrafts) -> Self {
        let DesignDrafts {
            entities,
            attributes,
            relationships,
            schema,
        } = drafts;
        if let Some(v) = entities {
            self.entities = v;
        }
        if let Some(v) = attributes {
            self.attributes = v;
        }
        if let Some(v) = relationships {
            self.relationships = v;
        }
        if let Some(v) = schema {
            self.schema = v;
        }
        self
    }
}

/**
 * \brief 编辑器中的未保存草稿，缺省字段沿用存储值。
 */
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DesignDrafts {
    #[serde(default)]
    pub entities: Option<String>,
    #[serde(default)]
    pub attributes: Option<String>,
    #[serde(default)]
    pub relationships: Option<String>,
    #[serde(default)]
    pub schema: Option<String>,
}

fn or_placeholder<'a>(text: &'a str, placeholder: &'a str) -> &'a str {
    if text.trim().is_empty() {
        placeholder
    } else {
        text
    }
}

/**
 * \brief 构造生成提示；依赖的实体草稿为空时返回 MissingInput。
 */
pub fn build_prompt(kind: SuggestionKind, inputs: &DesignInputs) -> Result<String, ChatError> {
    let entities = inputs.entities.trim();
    match kind {
        SuggestionKind::Entities => Ok("Suggest common entities for a database design. Format the response as a bulleted list with brief descriptions.".to_string()),
        SuggestionKind::Attributes => {
            if entities.is_empty() {
                return Err(ChatError::MissingInput(
                    "No entities defined. Please define some entities first before generating attributes.",
                ));
            }
            Ok(format!(
                "Based on these entities:\n\n{}\n\nSuggest appropriate attributes for each entity. Format the response as a bulleted list grouped by entity.",
                inputs.entities
            ))
        }
        SuggestionKind::Relationships => {
            if entities.is_empty() {
                return Err(ChatError::MissingInput(
                    "No entities defined. Please define some entities first before generating relationships.",
                ));
            }
            Ok(format!(
                "Based on these entities:\n\n{}\n\nAnd these attributes (if available):\n\n{}\n\nSuggest logical relationships between the entities. Include the relationship type (one-to-one, one-to-many, many-to-many) and a brief explanation of each relationship.",
                inputs.entities,
                or_placeholder(&inputs.attributes, "No attributes defined yet.")
            ))
        }
        SuggestionKind::Tables => {
            if entities.is_empty() {
                return Err(ChatError::MissingInput(
                    "No entities defined. Please define entities in the Requirements Analysis page first.",
                ));
            }
            Ok(format!(
                "Based on the following database design information, generate SQL CREATE TABLE statements with appropriate data types, primary keys, foreign keys, and constraints:

Entities:
{}

Attributes:
{}

Relationships:
{}

Schema Description:
{}

Please generate complete SQL statements that follow best practices for database design. Include appropriate indexes, constraints, and comments.",
                inputs.entities,
                or_placeholder(&inputs.attributes, "No specific attributes defined."),
                or_placeholder(&inputs.relationships, "No specific relationships defined."),
                or_placeholder(&inputs.schema, "No specific schema description provided."),
            ))
        }
    }
}

/**
 * \brief 把生成结果并入当前草稿：表定义整体替换，其余以空行分隔追加。
 */
pub fn merge(kind: SuggestionKind, current: &str, reply: &str) -> String {
    match kind {
        SuggestionKind::Tables => reply.to_string(),
        _ if current.is_empty() => reply.to_string(),
        _ => format!("{}\n\n{}", current, reply),
    }
}

/**
 * \brief 生成结果；merged 为合并后的草稿，尚未保存。
 */
#[derive(Debug, Clone, Serialize)]
pub struct Suggestion {
    pub kind: SuggestionKind,
    pub target_key: &'static str,
    pub reply: String,
    pub merged: String,
}

/**
 * \brief 调用模型生成草稿建议。
 * \details 先检查输入，再检查配置，最后发起一次请求。
 */
pub async fn generate(
    backend: &dyn ChatBackend,
    config: Option<&ProviderConfig>,
    kind: SuggestionKind,
    inputs: &DesignInputs,
    current: &str,
) -> Result<Suggestion, ChatError> {
    let prompt = build_prompt(kind, inputs)?;
    let config = config.ok_or(ChatError::ConfigMissing)?;
    let conversation = ConversationRequest::single(kind.system_instruction(), prompt);

    telemetry::log_event(
        "assist",
        &format!("generate kind={} provider={}", kind.as_str(), config.provider.as_str()),
    );
    let reply = backend.complete(config, &conversation).await.map_err(|e| {
        telemetry::log_error("assist", &format!("kind={} failed: {}", kind.as_str(), e));
        e
    })?;

    Ok(Suggestion {
        kind,
        target_key: kind.target_key(),
        merged: merge(kind, current, &reply),
        reply,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProviderKind;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Recording {
        seen: Mutex<Vec<ConversationRequest>>,
    }

    #[async_trait]
    impl ChatBackend for Recording {
        async fn complete(
            &self,
            _config: &ProviderConfig,
            conversation: &ConversationRequest,
        ) -> Result<String, ChatError> {
            self.seen
                .lock()
                .expect("lock")
                .push(conversation.clone());
            Ok("- Customer".to_string())
        }
    }

    #[test]
    fn prompts_require_entities_where_needed() {
        let empty = DesignInputs::default();
        assert!(build_prompt(SuggestionKind::Entities, &empty).is_ok());
        for kind in [
            SuggestionKind::Attributes,
            SuggestionKind::Relationships,
            SuggestionKind::Tables,
        ] {
            assert!(matches!(
                build_prompt(kind, &empty),
                Err(ChatError::MissingInput(_))
            ));
        }

        let inputs = DesignInputs {
            entities: "Customer".to_string(),
            ..DesignInputs::default()
        };
        let prompt = build_prompt(SuggestionKind::Tables, &inputs).expect("tables prompt");
        assert!(prompt.contains("Entities:\nCustomer"));
        assert!(prompt.contains("No specific relationships defined."));
    }

    #[test]
    fn merge_appends_or_replaces() {
        assert_eq!(merge(SuggestionKind::Entities, "", "new"), "new");
        assert_eq!(merge(SuggestionKind::Entities, "old", "new"), "old\n\nnew");
        assert_eq!(merge(SuggestionKind::Tables, "old", "new"), "new");
    }

    #[tokio::test]
    async fn generate_sends_single_turn_conversation() {
        let backend = Recording {
            seen: Mutex::new(Vec::new()),
        };
        let cfg = ProviderConfig::new(ProviderKind::Mistral, "k");
        let out = generate(
            &backend,
            Some(&cfg),
            SuggestionKind::Entities,
            &DesignInputs::default(),
            "Order",
        )
        .await
        .expect("generate");
        assert_eq!(out.merged, "Order\n\n- Customer");
        assert_eq!(out.target_key, "requirements_entities");

        let seen = backend.seen.lock().expect("lock");
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].system_instruction, ASSIST_SYSTEM);
        assert!(seen[0].one_shot);
        assert!(seen[0].turns.is_empty());
        assert!(seen[0].pending_user_text.starts_with("Suggest common entities"));
    }

    #[tokio::test]
    async fn tables_use_sql_instruction_and_replace_draft() {
        let backend = Recording {
            seen: Mutex::new(Vec::new()),
        };
        let cfg = ProviderConfig::new(ProviderKind::Gemini, "k");
        let inputs = DesignInputs {
            entities: "Customer".to_string(),
            ..DesignInputs::default()
        };
        let out = generate(&backend, Some(&cfg), SuggestionKind::Tables, &inputs, "old sql")
            .await
            .expect("generate");
        assert_eq!(out.merged, "- Customer");
        assert_eq!(out.target_key, "logical_tables");

        let seen = backend.seen.lock().expect("lock");
        assert_eq!(seen[0].system_instruction, SQL_SYSTEM);
        assert!(seen[0].one_shot);
        assert_eq!(
            SuggestionKind::Attributes.system_instruction(),
            ASSIST_SYSTEM
        );
    }

    #[test]
    fn drafts_override_saved_notes() {
        let saved = DesignInputs {
            entities: "Customer".to_string(),
            schema: "saved schema".to_string(),
            ..DesignInputs::default()
        };
        let merged = saved.with_drafts(DesignDrafts {
            schema: Some("draft schema".to_string()),
            ..DesignDrafts::default()
        });
        assert_eq!(merged.entities, "Customer");
        assert_eq!(merged.schema, "draft schema");

        let prompt = build_prompt(SuggestionKind::Tables, &merged).expect("tables prompt");
        assert!(prompt.contains("Schema Description:\ndraft schema"));
    }

    #[tokio::test]
    async fn missing_input_checked_before_config() {
        let backend = Recording {
            seen: Mutex::new(Vec::new()),
        };
        let err = generate(
            &backend,
            None,
            SuggestionKind::Attributes,
            &DesignInputs::default(),
            "",
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ChatError::MissingInput(_)));

        let err = generate(
            &backend,
            None,
            SuggestionKind::Entities,
            &DesignInputs::default(),
            "",
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ChatError::ConfigMissing));
        assert!(backend.seen.lock().expect("lock").is_empty());
    }
}
