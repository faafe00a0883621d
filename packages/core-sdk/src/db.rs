use anyhow::Result;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::{path::Path, thread, time::Duration};

use crate::models::ProviderConfig;

/** \brief 模型服务配置的存储键。 */
pub const SETTINGS_KEY: &str = "aiSettings";
/** \brief 遥测开关的存储键。 */
pub const TELEMETRY_KEY: &str = "telemetry_enabled";

/**
 * \brief 默认数据库路径：环境变量 DBPLANNER_DB，缺省为当前目录下的 dbplanner.db。
 */
pub fn default_db_path() -> String {
    std::env::var("DBPLANNER_DB").unwrap_or_else(|_| "dbplanner.db".to_string())
}

/**
 * \brief 打开默认数据库文件。
 */
pub fn open_default_db() -> Result<Connection> {
    open_db(default_db_path())
}

/**
 * \brief 打开指定路径的数据库并设置锁等待时间。
 */
pub fn open_db(path: impl AsRef<Path>) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(Duration::from_secs(5))?;
    Ok(conn)
}

/**
 * \brief 运行数据库迁移，创建键值表。
 */
pub fn migrate(conn: &Connection) -> Result<()> {
    retry_on_locked(|| {
        conn.execute_batch(
            r#"
        PRAGMA journal_mode=WAL;
        CREATE TABLE IF NOT EXISTS app_config (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
        "#,
        )
    })?;
    Ok(())
}

/**
 * \brief 读取原始 JSON 值；键不存在或内容无法解析时返回 None。
 */
pub fn get_raw(conn: &Connection, key: &str) -> Result<Option<Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value FROM app_config WHERE key=?1",
            params![key],
            |row| row.get(0),
        )
        .optional()?;
    Ok(raw.and_then(|s| serde_json::from_str(&s).ok()))
}

/**
 * \brief 按键读取并反序列化；缺失或类型不符时返回默认值。
 */
pub fn get_value<T: DeserializeOwned>(conn: &Connection, key: &str, default: T) -> Result<T> {
    Ok(get_raw(conn, key)?
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or(default))
}

/**
 * \brief 写入键值，后写覆盖先写。
 */
pub fn set_value<T: Serialize + ?Sized>(conn: &Connection, key: &str, value: &T) -> Result<()> {
    let encoded = serde_json::to_string(value)?;
    retry_on_locked(|| {
        conn.execute(
            "INSERT INTO app_config (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value=excluded.value",
            params![key, encoded],
        )
    })?;
    Ok(())
}

/**
 * \brief 删除指定键，返回是否确有删除。
 */
pub fn remove_value(conn: &Connection, key: &str) -> Result<bool> {
    let rows = retry_on_locked(|| conn.execute("DELETE FROM app_config WHERE key=?1", params![key]))?;
    Ok(rows > 0)
}

/**
 * \brief 列出全部键（按字典序）。
 */
pub fn list_keys(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT key FROM app_config ORDER BY key ASC")?;
    let rows = stmt
        .query_map([], |row| row.get(0))?
        .collect::<std::result::Result<Vec<String>, _>>()?;
    Ok(rows)
}

/**
 * \brief 读取已保存的模型服务配置（原始 JSON），交给 ProviderConfig::from_stored 解析。
 */
pub fn load_settings(conn: &Connection) -> Result<Option<Value>> {
    get_raw(conn, SETTINGS_KEY)
}

/**
 * \brief 保存模型服务配置。
 */
pub fn save_settings(conn: &Connection, config: &ProviderConfig) -> Result<()> {
    set_value(conn, SETTINGS_KEY, config)
}

/**
 * \brief 读取遥测开关。
 */
pub fn get_telemetry_enabled(conn: &Connection) -> Result<bool> {
    get_value(conn, TELEMETRY_KEY, false)
}

/**
 * \brief 更新遥测开关。
 */
pub fn set_telemetry_enabled(conn: &Connection, enabled: bool) -> Result<()> {
    set_value(conn, TELEMETRY_KEY, &enabled)
}

/**
 * \brief 针对 SQLite 锁冲突的重试助手。
 * \details 捕获 `database is locked`/`database table is locked` 等错误并线性退避，最多尝试 6 次。
 */
fn retry_on_locked<T, F>(mut action: F) -> Result<T>
where
    F: FnMut() -> rusqlite::Result<T>,
{
    const MAX_RETRIES: usize = 5;
    let mut attempt = 0;
    loop {
        match action() {
            Ok(value) => return Ok(value),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if matches!(
                    err.code,
                    ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
                ) && attempt < MAX_RETRIES =>
            {
                attempt += 1;
                thread::sleep(Duration::from_millis(200 * attempt as u64));
            }
            Err(e) => return Err(e.into()),
        }
    }
}
