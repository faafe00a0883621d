use anyhow::{bail, Result};
use rusqlite::Connection;
use serde::Serialize;

use crate::db;

/**
 * \brief 页面上的一个草稿文本框。
 */
#[derive(Debug, Clone, Copy, Serialize)]
pub struct NoteField {
    /** \brief 存储键 */
    pub key: &'static str,
    /** \brief 标签 */
    pub label: &'static str,
    /** \brief 首次打开时的默认内容 */
    pub default: &'static str,
}

/**
 * \brief 数据库设计阶段页面。
 */
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Page {
    pub slug: &'static str,
    pub title: &'static str,
    pub summary: &'static str,
    /** \brief 对话组件注入的页面上下文 */
    pub context: &'static str,
    pub fields: &'static [NoteField],
}

/**
 * \brief 页面及其草稿当前值。
 */
#[derive(Debug, Clone, Serialize)]
pub struct PageNotes {
    pub page: &'static Page,
    pub notes: Vec<NoteValue>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NoteValue {
    pub key: &'static str,
    pub label: &'static str,
    pub text: String,
}

const SAMPLE_TABLES: &str = "CREATE TABLE users (
  id INT PRIMARY KEY AUTO_INCREMENT,
  username VARCHAR(50) NOT NULL UNIQUE,
  email VARCHAR(100) NOT NULL UNIQUE,
  password_hash VARCHAR(255) NOT NULL,
  created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
  updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP
);

-- Add more tables here...";

const fn note(key: &'static str, label: &'static str) -> NoteField {
    NoteField {
        key,
        label,
        default: "",
    }
}

pub static PAGES: &[Page] = &[
    Page {
        slug: "dashboard",
        title: "Database Design Organizer",
        summary: "Plan, design, and document your database with AI assistance",
        context: "You are on the dashboard of the Database Design Organizer. You can help with general database design questions.",
        fields: &[],
    },
    Page {
        slug: "requirements",
        title: "Requirements Analysis",
        summary: "Understand the data requirements of your application or system",
        context: "You are on the Requirements Analysis page. You can help identify entities, attributes, and relationships for database design.",
        fields: &[
            note("requirements_entities", "Entities"),
            note("requirements_attributes", "Attributes"),
            note("requirements_relationships", "Relationships"),
        ],
    },
    Page {
        slug: "conceptual",
        title: "Conceptual Design",
        summary: "Create high-level models using Entity-Relationship diagrams",
        context: "You are on the Conceptual Design page. You can help create ER diagrams and define entities for database design.",
        fields: &[
            note("conceptual_diagram_notes", "ER Diagram"),
            note("conceptual_entity_definitions", "Entity Definitions"),
        ],
    },
    Page {
        slug: "logical",
        title: "Logical Design",
        summary: "Define tables, columns, data types, and constraints",
        context: "You are on the Logical Design page. You can help create database schemas, define tables and columns, and establish constraints.",
        fields: &[
            note("logical_schema", "Schema Definition"),
            NoteField {
                key: "logical_tables",
                label: "Tables & Columns",
                default: SAMPLE_TABLES,
            },
            note("logical_constraints", "Constraints"),
        ],
    },
    Page {
        slug: "normalization",
        title: "Normalization",
        summary: "Apply normalization rules to eliminate redundancy",
        context: "You are on the Normalization page. You can help apply normalization rules to eliminate redundancy and ensure data integrity.",
        fields: &[
            note("normalization_1nf", "First Normal Form"),
            note("normalization_2nf", "Second Normal Form"),
            note("normalization_3nf", "Third Normal Form"),
        ],
    },
    Page {
        slug: "denormalization",
        title: "Denormalization",
        summary: "Decide where redundancy pays for itself",
        context: "You are on the Denormalization page. You can help identify when denormalization is appropriate and suggest strategies for implementing it effectively.",
        fields: &[
            note("denormalization_reasons", "Reasons"),
            note("denormalization_strategy", "Strategy"),
            note("denormalization_implementation", "Implementation"),
        ],
    },
    Page {
        slug: "indexing",
        title: "Indexing",
        summary: "Plan indexes and their maintenance",
        context: "You are on the Indexing page. You can help develop an indexing strategy, define specific indexes, and plan for index maintenance.",
        fields: &[
            note("indexing_strategy", "Strategy"),
            note("indexing_definitions", "Definitions"),
            note("indexing_maintenance", "Maintenance"),
        ],
    },
    Page {
        slug: "integrity",
        title: "Data Integrity",
        summary: "Constraints, validation rules, and triggers",
        context: "You are on the Data Integrity page. You can help implement constraints, validation rules, and triggers to ensure data accuracy and consistency.",
        fields: &[
            note("integrity_constraints", "Constraints"),
            note("integrity_validation", "Validation Rules"),
            note("integrity_triggers", "Triggers"),
        ],
    },
    Page {
        slug: "security",
        title: "Security",
        summary: "Authentication, authorization, encryption, and auditing",
        context: "You are on the Security page. You can help design a secure database with proper authentication, authorization, encryption, and auditing.",
        fields: &[
            note("security_authentication", "Authentication"),
            note("security_authorization", "Authorization"),
            note("security_encryption", "Encryption"),
            note("security_auditing", "Auditing"),
        ],
    },
    Page {
        slug: "scalability",
        title: "Scalability",
        summary: "Design the database to handle growth and increased load",
        context: "You are on the Scalability page. You can help design a scalable database that can handle growth and increased load.",
        fields: &[
            note("scalability_vertical", "Vertical Scaling"),
            note("scalability_horizontal", "Horizontal Scaling"),
            note("scalability_partitioning", "Partitioning"),
            note("scalability_caching", "Caching"),
        ],
    },
    Page {
        slug: "performance",
        title: "Performance Optimization",
        summary: "Query optimization, schema optimization, and monitoring",
        context: "You are on the Performance Optimization page. You can help optimize database performance through query optimization, schema optimization, and performance monitoring.",
        fields: &[
            note("performance_query", "Query Optimization"),
            note("performance_schema", "Schema Optimization"),
            note("performance_monitoring", "Monitoring"),
        ],
    },
    Page {
        slug: "backup",
        title: "Backup & Recovery",
        summary: "Protect against data loss",
        context: "You are on the Backup & Recovery page. You can help implement a backup and recovery strategy to protect against data loss.",
        fields: &[
            note("backup_strategy", "Backup Strategy"),
            note("recovery_plan", "Recovery Plan"),
            note("disaster_recovery", "Disaster Recovery"),
        ],
    },
    Page {
        slug: "documentation",
        title: "Documentation",
        summary: "Schema documentation, data dictionary, and procedures",
        context: "You are on the Documentation page. You can help document the database design, including schema, data dictionary, and procedures.",
        fields: &[
            note("documentation_schema", "Schema Documentation"),
            note("documentation_dictionary", "Data Dictionary"),
            note("documentation_procedures", "Procedures & Standards"),
        ],
    },
    Page {
        slug: "testing",
        title: "Testing",
        summary: "Verify the design meets requirements and performs well",
        context: "You are on the Testing page. You can help define tests to ensure your database design meets requirements and performs well.",
        fields: &[
            note("testing_unit", "Unit Testing"),
            note("testing_integration", "Integration Testing"),
            note("testing_performance", "Performance Testing"),
            note("testing_security", "Security Testing"),
        ],
    },
];

/**
 * \brief 按 slug 查找页面。
 */
pub fn find_page(slug: &str) -> Option<&'static Page> {
    PAGES.iter().find(|p| p.slug == slug)
}

/**
 * \brief 按存储键查找草稿字段。
 */
pub fn find_field(key: &str) -> Option<&'static NoteField> {
    PAGES
        .iter()
        .flat_map(|p| p.fields.iter())
        .find(|f| f.key == key)
}

/**
 * \brief 读取单个草稿，未保存时返回字段默认值。
 */
pub fn load_note(conn: &Connection, key: &str) -> Result<String> {
    let Some(field) = find_field(key) else {
        bail!("unknown note key: {}", key);
    };
    db::get_value(conn, field.key, field.default.to_string())
}

/**
 * \brief 读取页面全部草稿。
 */
pub fn load_notes(conn: &Connection, page: &'static Page) -> Result<PageNotes> {
    let mut notes = Vec::with_capacity(page.fields.len());
    for field in page.fields {
        notes.push(NoteValue {
            key: field.key,
            label: field.label,
            text: db::get_value(conn, field.key, field.default.to_string())?,
        });
    }
    Ok(PageNotes { page, notes })
}

/**
 * \brief 保存草稿；只接受目录中登记过的键。
 */
pub fn save_note(conn: &Connection, key: &str, text: &str) -> Result<()> {
    if find_field(key).is_none() {
        bail!("unknown note key: {}", key);
    }
    db::set_value(conn, key, text)
}
