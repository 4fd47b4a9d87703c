use std::path::{Path, PathBuf};

use bytes::Bytes;
use corvus_core::files::resolve_path;
use corvus_core::prelude::*;
use tokio::fs;

const ADAPTOR: &str = "local";

async fn atomic_write(path: &Path, data: Bytes) -> Result<(), SchedulerError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| SchedulerError::io(ADAPTOR, e))?;
    }

    let tmp_path = path.with_extension("tmp");

    fs::write(&tmp_path, data)
        .await
        .map_err(|e| SchedulerError::io(ADAPTOR, e))?;
    fs::rename(&tmp_path, path)
        .await
        .map_err(|e| SchedulerError::io(ADAPTOR, e))?;

    Ok(())
}

/// [`FileAccess`] on the local file system. Writes go through a temporary file and
/// a rename so a job never sees a half-written input file.
#[derive(Debug, Clone)]
pub struct LocalFileAccess {
    root: PathBuf,
}

impl LocalFileAccess {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn get_path(&self, path: &str) -> PathBuf {
        PathBuf::from(resolve_path(&self.root.to_string_lossy(), path))
    }
}

impl FileAccess for LocalFileAccess {
    async fn read_file(&self, path: &str) -> Result<Bytes, SchedulerError> {
        let path = self.get_path(path);
        match fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(SchedulerError::adaptor(
                ADAPTOR,
                format!("File not found: {}", path.display()),
            )),
            Err(e) => Err(SchedulerError::io(ADAPTOR, e)),
        }
    }

    async fn write_file(&self, path: &str, data: Bytes) -> Result<(), SchedulerError> {
        atomic_write(&self.get_path(path), data).await
    }

    async fn working_directory(&self) -> Result<String, SchedulerError> {
        Ok(self.root.to_string_lossy().into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_then_reads_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        let files = LocalFileAccess::new(dir.path());

        files
            .write_file("jobs/in.txt", Bytes::from_static(b"input"))
            .await
            .unwrap();
        assert!(dir.path().join("jobs/in.txt").exists());
        assert!(!dir.path().join("jobs/in.tmp").exists());

        let data = files.read_file("jobs/in.txt").await.unwrap();
        assert_eq!(data, Bytes::from_static(b"input"));

        assert!(files.read_file("missing.txt").await.is_err());
    }
}
