use std::sync::Arc;

use bytes::Bytes;
use corvus_core::files::resolve_path;
use corvus_core::prelude::*;
use tokio::io::AsyncWriteExt;

use crate::ADAPTOR;
use crate::process::SshPool;

/// [`FileAccess`] over sftp channels borrowed from the session pool.
pub struct SftpFileAccess {
    pool: Arc<SshPool>,
    root: Option<String>,
}

impl SftpFileAccess {
    /// Paths are resolved against `root`, or the remote home directory when unset.
    pub fn new(pool: Arc<SshPool>, root: Option<String>) -> Self {
        Self { pool, root }
    }

    async fn resolve(&self, path: &str) -> Result<String, SchedulerError> {
        let base = self.working_directory().await?;
        Ok(resolve_path(&base, path))
    }
}

fn sftp_error(path: &str, e: impl std::fmt::Display) -> SchedulerError {
    SchedulerError::adaptor(ADAPTOR, format!("sftp failed on {path}: {e}"))
}

impl FileAccess for SftpFileAccess {
    async fn read_file(&self, path: &str) -> Result<Bytes, SchedulerError> {
        let path = self.resolve(path).await?;
        let lease = self.pool.acquire_sftp().await?;

        let result = lease.channel.read(path.clone()).await;
        match result {
            Ok(data) => {
                self.pool.release_sftp(lease).await;
                Ok(Bytes::from(data))
            }
            Err(e) => {
                self.pool.fail_channel(lease).await;
                Err(sftp_error(&path, e))
            }
        }
    }

    async fn write_file(&self, path: &str, data: Bytes) -> Result<(), SchedulerError> {
        let path = self.resolve(path).await?;
        let lease = self.pool.acquire_sftp().await?;

        let result = async {
            let mut file = lease
                .channel
                .create(path.clone())
                .await
                .map_err(|e| sftp_error(&path, e))?;
            file.write_all(&data)
                .await
                .map_err(|e| sftp_error(&path, e))?;
            file.shutdown().await.map_err(|e| sftp_error(&path, e))
        }
        .await;

        match result {
            Ok(()) => {
                self.pool.release_sftp(lease).await;
                Ok(())
            }
            Err(e) => {
                self.pool.fail_channel(lease).await;
                Err(e)
            }
        }
    }

    async fn working_directory(&self) -> Result<String, SchedulerError> {
        if let Some(root) = &self.root {
            return Ok(root.clone());
        }

        let lease = self.pool.acquire_sftp().await?;
        let result = lease.channel.canonicalize(".").await;
        match result {
            Ok(home) => {
                self.pool.release_sftp(lease).await;
                Ok(home)
            }
            Err(e) => {
                self.pool.fail_channel(lease).await;
                Err(sftp_error(".", e))
            }
        }
    }
}
