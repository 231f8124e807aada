use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Local copy of an input image, removed when dropped.
///
/// Dropping covers every exit path of a run, including a task being aborted
/// mid-poll.
#[derive(Debug)]
pub struct ScratchFile {
    file: NamedTempFile,
}

impl ScratchFile {
    pub async fn create(dir: &Path, source_id: &str, bytes: &[u8]) -> anyhow::Result<Self> {
        let dir = dir.to_path_buf();
        let prefix = format!("{}-", sanitize(source_id));
        let bytes = bytes.to_vec();

        tokio::task::spawn_blocking(move || -> anyhow::Result<Self> {
            let mut file = tempfile::Builder::new()
                .prefix(&prefix)
                .suffix(".jpg")
                .tempfile_in(&dir)?;
            file.write_all(&bytes)?;
            file.flush()?;
            Ok(Self { file })
        })
        .await
        .map_err(|e| anyhow::anyhow!("scratch file task failed: {e}"))?
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Removes the file now, reporting failures instead of ignoring them.
    pub fn remove(self) -> std::io::Result<PathBuf> {
        let path = self.file.path().to_path_buf();
        self.file.close()?;
        Ok(path)
    }
}

fn sanitize(source_id: &str) -> String {
    let cleaned: String = source_id
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'))
        .take(64)
        .collect();
    if cleaned.is_empty() {
        "image".to_string()
    } else {
        cleaned
    }
}
