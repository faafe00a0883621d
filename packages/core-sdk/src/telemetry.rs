use std::{fs::OpenOptions, io::Write, path::PathBuf, sync::RwLock};

use anyhow::Result;
use once_cell::sync::Lazy;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

const LOG_FILE: &str = "dbplanner.log";

struct TelemetryState {
    enabled: bool,
    dir: PathBuf,
}

static TELEMETRY: Lazy<RwLock<TelemetryState>> = Lazy::new(|| {
    let dir = std::env::var("DBPLANNER_LOG_DIR").unwrap_or_else(|_| "logs".to_string());
    RwLock::new(TelemetryState {
        enabled: false,
        dir: PathBuf::from(dir),
    })
});

/**
 * \brief 更新遥测开关状态。
 */
pub fn set_enabled(enabled: bool) {
    if let Ok(mut guard) = TELEMETRY.write() {
        guard.enabled = enabled;
    }
}

/**
 * \brief 查询当前遥测开关状态。
 */
pub fn is_enabled() -> bool {
    TELEMETRY.read().map(|g| g.enabled).unwrap_or(false)
}

/**
 * \brief 修改日志目录。
 */
pub fn set_log_dir(dir: impl Into<PathBuf>) {
    if let Ok(mut guard) = TELEMETRY.write() {
        guard.dir = dir.into();
    }
}

/**
 * \brief 当前日志文件完整路径。
 */
pub fn log_path() -> PathBuf {
    TELEMETRY
        .read()
        .map(|g| g.dir.join(LOG_FILE))
        .unwrap_or_else(|_| PathBuf::from("logs").join(LOG_FILE))
}

/**
 * \brief 记录常规事件。调用方负责不传入 API Key 等敏感内容。
 */
pub fn log_event(category: &str, message: &str) {
    if !is_enabled() {
        return;
    }
    if let Err(err) = write_line("INFO", category, message) {
        eprintln!("telemetry write failed: {}", err);
    }
}

/**
 * \brief 记录错误事件。
 */
pub fn log_error(category: &str, message: &str) {
    if !is_enabled() {
        return;
    }
    if let Err(err) = write_line("ERROR", category, message) {
        eprintln!("telemetry write failed: {}", err);
    }
}

fn write_line(level: &str, category: &str, message: &str) -> Result<()> {
    let path = log_path();
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let timestamp = OffsetDateTime::now_utc().format(&Rfc3339)?;
    let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
    // one record per line; embedded newlines would split a record
    let message = message.replace('\n', "\\n");
    writeln!(file, "{} [{}] {} - {}", timestamp, level, category, message)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_only_when_enabled() {
        let dir = tempfile::tempdir().expect("tempdir");
        set_log_dir(dir.path());

        set_enabled(false);
        log_event("test", "dropped");
        assert!(!log_path().exists());

        set_enabled(true);
        log_event("test", "first\nline");
        log_error("test", "second");
        set_enabled(false);

        let content = std::fs::read_to_string(log_path()).expect("read log");
        // other tests in this process may log concurrently while the flag is on
        let lines: Vec<&str> = content.lines().filter(|l| l.contains("] test - ")).collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("[INFO] test - first\\nline"));
        assert!(lines[1].contains("[ERROR] test - second"));
    }
}
