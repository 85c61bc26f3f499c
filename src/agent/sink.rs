use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Failed to publish the webhook URL
#[derive(Debug, thiserror::Error)]
#[error("failed to write webhook file {}: {}", .path.display(), .source)]
pub struct PublishError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

/// File through which n8n picks up the current webhook URL
#[derive(Debug, Clone)]
pub struct WebhookSink {
    path: PathBuf,
}

impl WebhookSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the file content with exactly `url`.
    ///
    /// Writes a sibling temporary file, syncs it, then renames it over the
    /// target so readers see either the old or the new URL. The parent
    /// directory must already exist. On failure the previous file is left as
    /// it was.
    pub fn publish(&self, url: &str) -> Result<(), PublishError> {
        let temp_path = self.temp_path();

        let result = write_and_rename(&temp_path, &self.path, url.as_bytes());

        if result.is_err() {
            // Best effort, the temp file may never have been created
            let _ = std::fs::remove_file(&temp_path);
        }

        result.map_err(|source| PublishError {
            path: self.path.clone(),
            source,
        })?;

        tracing::info!("Updated webhook file with URL: {}", url);
        Ok(())
    }

    /// Currently published URL, if the file exists and is non-empty
    pub fn read_current(&self) -> io::Result<Option<String>> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) if content.is_empty() => Ok(None),
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

fn write_and_rename(temp_path: &Path, path: &Path, content: &[u8]) -> io::Result<()> {
    {
        let mut file = File::create(temp_path)?;
        file.write_all(content)?;
        file.sync_all()?;
    }

    set_permissions_readable_all(temp_path)?;

    std::fs::rename(temp_path, path)
}

/// 644 so other containers sharing the volume can read it
fn set_permissions_readable_all(path: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        let mut permissions = std::fs::metadata(path)?.permissions();
        permissions.set_mode(0o644);
        std::fs::set_permissions(path, permissions)?;
    }

    #[cfg(not(unix))]
    let _ = path;

    Ok(())
}
