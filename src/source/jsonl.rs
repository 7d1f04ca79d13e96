use super::{FetchWindow, Message, MessageSource, SourceError};
use async_trait::async_trait;
use chrono::Utc;
use std::path::{Component, Path, PathBuf};

/// Reads exported chat history from `<dir>/<group_id>.jsonl`, one message per line
pub struct JsonlSource {
    dir: PathBuf,
}

impl JsonlSource {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// The id must be a single plain file name so lookups stay inside `dir`
    fn group_path(&self, group_id: &str) -> Result<PathBuf, SourceError> {
        let mut components = Path::new(group_id).components();
        let plain = matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        ) && !group_id.contains(['/', '\\']);
        if !plain {
            return Err(SourceError::UnknownGroup(group_id.to_string()));
        }
        Ok(self.dir.join(format!("{}.jsonl", group_id)))
    }
}

#[async_trait]
impl MessageSource for JsonlSource {
    async fn list_groups(&self) -> Result<Vec<String>, SourceError> {
        let mut groups = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(groups),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("jsonl") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                groups.push(stem.to_string());
            }
        }

        groups.sort();
        Ok(groups)
    }

    async fn fetch_messages(
        &self,
        group_id: &str,
        window: FetchWindow,
        max_count: usize,
    ) -> Result<Vec<Message>, SourceError> {
        let path = self.group_path(group_id)?;
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(group_id = %group_id, path = %path.display(), "No history file");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let cutoff = match window {
            FetchWindow::Since(ts) => ts,
            FetchWindow::LastDays(days) => Utc::now().timestamp() - i64::from(days) * 86_400 - 1,
        };

        let mut messages = Vec::new();
        for (line_no, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Message>(line) {
                Ok(mut msg) => {
                    if msg.timestamp <= cutoff {
                        continue;
                    }
                    if msg.group_id.is_empty() {
                        msg.group_id = group_id.to_string();
                    }
                    messages.push(msg);
                }
                Err(e) => {
                    tracing::warn!(
                        group_id = %group_id,
                        line = line_no + 1,
                        error = %e,
                        "Skipping malformed message line"
                    );
                }
            }
        }

        messages.sort_by_key(|msg| msg.timestamp);
        if messages.len() > max_count {
            messages.drain(..messages.len() - max_count);
        }
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_history(dir: &std::path::Path, group_id: &str, lines: &[String]) {
        let mut file = std::fs::File::create(dir.join(format!("{}.jsonl", group_id))).unwrap();
        for line in lines {
            writeln!(file, "{}", line).unwrap();
        }
    }

    fn line(sender: &str, ts: i64, text: &str) -> String {
        serde_json::json!({
            "sender_id": sender,
            "sender_name": sender,
            "text": text,
            "timestamp": ts,
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_group_ids_cannot_leave_the_export_dir() {
        let root = tempfile::tempdir().unwrap();
        let exports = root.path().join("qq");
        std::fs::create_dir(&exports).unwrap();
        write_history(root.path(), "secret", &[line("a", 100, "private")]);
        write_history(&exports, "team.dev", &[line("b", 100, "ok")]);

        let source = JsonlSource::new(exports);
        for group_id in ["../secret", "..", "", "/tmp/secret", "sub/../../secret"] {
            let result = source.fetch_messages(group_id, FetchWindow::Since(0), 100).await;
            assert!(
                matches!(result, Err(SourceError::UnknownGroup(_))),
                "{:?} was accepted",
                group_id
            );
        }

        let messages = source
            .fetch_messages("team.dev", FetchWindow::Since(0), 100)
            .await
            .unwrap();
        assert_eq!(messages.len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_since_is_exclusive_and_sorted() {
        let dir = tempfile::tempdir().unwrap();
        write_history(
            dir.path(),
            "g1",
            &[line("a", 300, "c"), line("a", 100, "a"), line("b", 200, "b")],
        );

        let source = JsonlSource::new(dir.path().to_path_buf());
        let messages = source
            .fetch_messages("g1", FetchWindow::Since(100), 100)
            .await
            .unwrap();

        let stamps: Vec<i64> = messages.iter().map(|m| m.timestamp).collect();
        assert_eq!(stamps, vec![200, 300]);
        assert!(messages.iter().all(|m| m.group_id == "g1"));
    }

    #[tokio::test]
    async fn test_max_count_keeps_newest() {
        let dir = tempfile::tempdir().unwrap();
        let lines: Vec<String> = (1..=10).map(|i| line("a", i * 10, "x")).collect();
        write_history(dir.path(), "g1", &lines);

        let source = JsonlSource::new(dir.path().to_path_buf());
        let messages = source
            .fetch_messages("g1", FetchWindow::Since(0), 3)
            .await
            .unwrap();

        let stamps: Vec<i64> = messages.iter().map(|m| m.timestamp).collect();
        assert_eq!(stamps, vec![80, 90, 100]);
    }

    #[tokio::test]
    async fn test_malformed_lines_and_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        write_history(
            dir.path(),
            "g1",
            &[line("a", 100, "ok"), "{not json".to_string(), String::new()],
        );

        let source = JsonlSource::new(dir.path().to_path_buf());
        let messages = source
            .fetch_messages("g1", FetchWindow::Since(0), 10)
            .await
            .unwrap();
        assert_eq!(messages.len(), 1);

        let none = source
            .fetch_messages("missing", FetchWindow::LastDays(1), 10)
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_list_groups() {
        let dir = tempfile::tempdir().unwrap();
        write_history(dir.path(), "g2", &[]);
        write_history(dir.path(), "g1", &[]);
        std::fs::write(dir.path().join("notes.txt"), "ignore").unwrap();

        let source = JsonlSource::new(dir.path().to_path_buf());
        assert_eq!(source.list_groups().await.unwrap(), vec!["g1", "g2"]);
    }
}
