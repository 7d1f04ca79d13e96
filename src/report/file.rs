use super::{ReportError, ReportPayload, ReportSink};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Writes each report as pretty JSON under `<dir>/<platform>/<group>/<generated_at>.json`
pub struct FileReportSink {
    dir: PathBuf,
}

impl FileReportSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn report_path(&self, payload: &ReportPayload, group_id: &str, platform_id: &str) -> PathBuf {
        self.dir
            .join(sanitize(platform_id))
            .join(sanitize(group_id))
            .join(format!("{}.json", payload.generated_at))
    }
}

/// Keep ids from escaping the report directory
fn sanitize(component: &str) -> String {
    let cleaned: String = component
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned
    }
}

#[async_trait]
impl ReportSink for FileReportSink {
    async fn dispatch(
        &self,
        payload: &ReportPayload,
        group_id: &str,
        platform_id: &str,
    ) -> Result<(), ReportError> {
        let path = self.report_path(payload, group_id, platform_id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let body = serde_json::to_vec_pretty(payload)?;
        tokio::fs::write(&path, body).await?;

        tracing::info!(
            group_id = %group_id,
            platform_id = %platform_id,
            path = %path.display(),
            "Report written"
        );
        Ok(())
    }
}
