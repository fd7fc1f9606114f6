use crate::storage::repository::RawDrawRepository;
use anyhow::Context;
use log::{info, warn};
use sea_orm::DatabaseConnection;
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};

pub const SOURCE_INBOX: &str = "inbox";
pub const INBOX_EXTENSION: &str = "jsonl";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CollectReport {
    pub files: usize,
    pub rows: usize,
    pub skipped: usize,
}

/// 从收件目录读取 JSON Lines 文件，每行一条原始开奖，写入 raw_draws。
/// 处理完的文件改名为 *.done，不会重复导入。
#[derive(Debug, Clone)]
pub struct InboxCollector {
    inbox: Option<PathBuf>,
}

impl InboxCollector {
    pub fn new(inbox: Option<PathBuf>) -> Self {
        Self { inbox }
    }

    pub async fn collect(&self, db: &DatabaseConnection) -> anyhow::Result<CollectReport> {
        let Some(inbox) = &self.inbox else {
            info!("未配置 COLLECTOR_INBOX，跳过采集");
            return Ok(CollectReport::default());
        };

        let mut report = CollectReport::default();
        for path in pending_files(inbox).await? {
            let content = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("读取 {} 失败", path.display()))?;
            for (lineno, line) in content.lines().enumerate() {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match parse_line(line) {
                    Some((period, payload)) => {
                        RawDrawRepository::upsert_raw(db, &period, &payload, SOURCE_INBOX).await?;
                        report.rows += 1;
                    }
                    None => {
                        warn!("{}:{} 无法解析，已跳过", path.display(), lineno + 1);
                        report.skipped += 1;
                    }
                }
            }

            let done = path.with_extension(format!("{}.done", INBOX_EXTENSION));
            tokio::fs::rename(&path, &done)
                .await
                .with_context(|| format!("重命名 {} 失败", path.display()))?;
            report.files += 1;
        }

        if report.files > 0 {
            info!(
                "采集完成: 文件 {}, 写入 {}, 跳过 {}",
                report.files, report.rows, report.skipped
            );
        }
        Ok(report)
    }
}

fn parse_line(line: &str) -> Option<(String, Value)> {
    let payload: Value = serde_json::from_str(line).ok()?;
    let period = match payload.get("period")? {
        Value::String(s) if !s.trim().is_empty() => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    Some((period, payload))
}

async fn pending_files(inbox: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(inbox)
        .await
        .with_context(|| format!("打开收件目录 {} 失败", inbox.display()))?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some(INBOX_EXTENSION) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::connection::test_support::temp_db;

    #[tokio::test]
    async fn without_inbox_is_a_noop() {
        let (_dir, db) = temp_db().await;
        let report = InboxCollector::new(None).collect(&db).await.unwrap();
        assert_eq!(report, CollectReport::default());
    }

    #[tokio::test]
    async fn ingests_lines_and_marks_file_done() {
        let (dir, db) = temp_db().await;
        let inbox = dir.path().join("inbox");
        std::fs::create_dir_all(&inbox).unwrap();
        std::fs::write(
            inbox.join("batch-1.jsonl"),
            concat!(
                r#"{"period":"001","openTime":"2024-01-01 00:00:00","openCode":"1,2,3,4,5","timestamp":1}"#,
                "\n",
                "not json\n",
                "\n",
                r#"{"period":"002","openTime":"2024-01-01 00:01:00","openCode":"1,2,3,4,6","timestamp":2}"#,
                "\n",
            ),
        )
        .unwrap();
        std::fs::write(inbox.join("notes.txt"), "ignored").unwrap();

        let collector = InboxCollector::new(Some(inbox.clone()));
        let report = collector.collect(&db).await.unwrap();
        assert_eq!(
            report,
            CollectReport {
                files: 1,
                rows: 2,
                skipped: 1
            }
        );
        assert!(inbox.join("batch-1.jsonl.done").exists());
        assert!(!inbox.join("batch-1.jsonl").exists());

        let raw = RawDrawRepository::find_by_period(&db, "002").await.unwrap().unwrap();
        assert_eq!(raw.source, SOURCE_INBOX);

        // 第二次运行没有新文件
        assert_eq!(collector.collect(&db).await.unwrap().files, 0);
    }

    #[tokio::test]
    async fn numeric_periods_pass_validation() {
        let (dir, db) = temp_db().await;
        let inbox = dir.path().join("inbox");
        std::fs::create_dir_all(&inbox).unwrap();
        std::fs::write(
            inbox.join("numeric.jsonl"),
            r#"{"period":20250101001,"openTime":"2025-01-01 00:00:00","openCode":"1,2,3,4,5"}"#,
        )
        .unwrap();

        let report = InboxCollector::new(Some(inbox)).collect(&db).await.unwrap();
        assert_eq!(report.rows, 1);

        let validated = crate::pipeline::validator::run_validation(&db, 10).await.unwrap();
        assert_eq!(validated.passed, 1);
        assert_eq!(validated.failed, 0);
        let raw = RawDrawRepository::find_by_period(&db, "20250101001")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(raw.status, crate::storage::repository::raw_draw_repo::RAW_PASSED);
    }
}
