//! SSH transport on top of russh.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use corvus_core::prelude::*;
use russh::client::{self, Handle, Msg};
use russh::{Channel, Disconnect};
use russh_keys::key::{KeyPair, PublicKey};
use russh_sftp::client::SftpSession;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::ADAPTOR;
use crate::config::{Endpoint, SshConfig};
use crate::pool::{RemoteSession, SessionConnector};

/// Host key policy of one connection.
pub struct ClientHandler {
    host: String,
    port: u16,
    strict: bool,
}

#[async_trait]
impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(&mut self, key: &PublicKey) -> Result<bool, Self::Error> {
        if !self.strict {
            return Ok(true);
        }
        match russh_keys::check_known_hosts(&self.host, self.port, key) {
            Ok(known) => {
                if !known {
                    warn!(host = %self.host, "Host key not found in known_hosts");
                }
                Ok(known)
            }
            Err(e) => {
                warn!(host = %self.host, error = %e, "Host key verification failed");
                Ok(false)
            }
        }
    }
}

/// Opens authenticated russh sessions with the credential of an [`SshConfig`].
#[derive(Clone)]
pub struct RusshConnector {
    credential: Credential,
    strict_host_key_checking: bool,
    timeout: Duration,
}

impl RusshConnector {
    pub fn new(config: &SshConfig) -> Self {
        Self {
            credential: config.credential.clone(),
            strict_host_key_checking: config.strict_host_key_checking,
            timeout: config.connect_timeout(),
        }
    }

    async fn authenticate(
        &self,
        handle: &mut Handle<ClientHandler>,
        user: &str,
    ) -> Result<(), SchedulerError> {
        let auth_error = |message: String| SchedulerError::Authentication {
            adaptor: ADAPTOR.to_string(),
            message,
        };

        let accepted = match &self.credential {
            Credential::Password { password, .. } => handle
                .authenticate_password(user, password)
                .await
                .map_err(|e| auth_error(e.to_string()))?,
            Credential::Certificate {
                key_file,
                passphrase,
                ..
            } => {
                let key = load_key(key_file, passphrase.as_deref())?;
                handle
                    .authenticate_publickey(user, Arc::new(key))
                    .await
                    .map_err(|e| auth_error(e.to_string()))?
            }
            Credential::Default => {
                let mut accepted = false;
                for path in default_keys() {
                    let key = match load_key(&path, None) {
                        Ok(key) => key,
                        Err(e) => {
                            debug!(key = %path.display(), error = %e, "Skipping key");
                            continue;
                        }
                    };
                    accepted = handle
                        .authenticate_publickey(user, Arc::new(key))
                        .await
                        .map_err(|e| auth_error(e.to_string()))?;
                    if accepted {
                        break;
                    }
                }
                accepted
            }
        };

        if accepted {
            Ok(())
        } else {
            Err(auth_error(format!("Server rejected credential for user {user}")))
        }
    }
}

impl SessionConnector for RusshConnector {
    type Session = RusshSession;

    async fn connect(&self, address: &Endpoint, user: &str) -> Result<RusshSession, SchedulerError> {
        let config = Arc::new(client::Config::default());
        let handler = ClientHandler {
            host: address.host.clone(),
            port: address.port,
            strict: self.strict_host_key_checking,
        };

        let connect = client::connect(config, (address.host.as_str(), address.port), handler);
        let mut handle = tokio::time::timeout(self.timeout, connect)
            .await
            .map_err(|_| SchedulerError::Connection {
                adaptor: ADAPTOR.to_string(),
                message: format!("Timed out connecting to {address}"),
            })?
            .map_err(|e| SchedulerError::Connection {
                adaptor: ADAPTOR.to_string(),
                message: format!("Failed to connect to {address}: {e}"),
            })?;

        self.authenticate(&mut handle, user).await?;
        debug!(address = %address, user, "Session authenticated");

        Ok(RusshSession {
            handle: Arc::new(handle),
            tunnels: Mutex::new(HashMap::new()),
        })
    }
}

fn load_key(path: &Path, passphrase: Option<&str>) -> Result<KeyPair, SchedulerError> {
    russh_keys::load_secret_key(path, passphrase).map_err(|e| SchedulerError::Authentication {
        adaptor: ADAPTOR.to_string(),
        message: format!("Cannot load key {}: {e}", path.display()),
    })
}

fn default_keys() -> Vec<PathBuf> {
    let Some(home) = std::env::var_os("HOME") else {
        return Vec::new();
    };
    let ssh = PathBuf::from(home).join(".ssh");
    ["id_ed25519", "id_rsa"]
        .iter()
        .map(|name| ssh.join(name))
        .filter(|path| path.is_file())
        .collect()
}

/// An authenticated russh session plus the local port forwards it serves.
pub struct RusshSession {
    handle: Arc<Handle<ClientHandler>>,
    tunnels: Mutex<HashMap<u16, JoinHandle<()>>>,
}

impl RusshSession {
    async fn open_session_channel(&self) -> Result<Channel<Msg>, SchedulerError> {
        self.handle
            .channel_open_session()
            .await
            .map_err(|e| SchedulerError::channel(ADAPTOR, e.to_string()))
    }
}

impl RemoteSession for RusshSession {
    type Exec = Channel<Msg>;
    type Sftp = SftpSession;

    async fn open_exec(&self) -> Result<Channel<Msg>, SchedulerError> {
        self.open_session_channel().await
    }

    async fn open_sftp(&self) -> Result<SftpSession, SchedulerError> {
        let channel = self.open_session_channel().await?;
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|e| SchedulerError::channel(ADAPTOR, e.to_string()))?;
        SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| SchedulerError::channel(ADAPTOR, e.to_string()))
    }

    async fn forward_local(&self, host: &str, port: u16) -> Result<u16, SchedulerError> {
        let listener = TcpListener::bind(("127.0.0.1", 0))
            .await
            .map_err(|e| SchedulerError::io(ADAPTOR, e))?;
        let local_port = listener
            .local_addr()
            .map_err(|e| SchedulerError::io(ADAPTOR, e))?
            .port();

        let handle = self.handle.clone();
        let host = host.to_string();
        let task = tokio::spawn(async move {
            loop {
                let (mut socket, peer) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!(error = %e, "Tunnel listener failed");
                        break;
                    }
                };

                let channel = match handle
                    .channel_open_direct_tcpip(
                        host.clone(),
                        u32::from(port),
                        peer.ip().to_string(),
                        u32::from(peer.port()),
                    )
                    .await
                {
                    Ok(channel) => channel,
                    Err(e) => {
                        warn!(error = %e, "Failed to open tunnel channel");
                        continue;
                    }
                };

                tokio::spawn(async move {
                    let mut stream = channel.into_stream();
                    if let Err(e) = tokio::io::copy_bidirectional(&mut socket, &mut stream).await {
                        debug!(error = %e, "Tunnel connection ended");
                    }
                });
            }
        });

        lock(&self.tunnels).insert(local_port, task);
        debug!(local_port, "Tunnel listening");
        Ok(local_port)
    }

    async fn cancel_forward(&self, port: u16) -> Result<(), SchedulerError> {
        match lock(&self.tunnels).remove(&port) {
            Some(task) => {
                task.abort();
                Ok(())
            }
            None => Err(SchedulerError::channel(
                ADAPTOR,
                format!("No tunnel on local port {port}"),
            )),
        }
    }

    async fn disconnect(&self) -> Result<(), SchedulerError> {
        for (_, task) in lock(&self.tunnels).drain() {
            task.abort();
        }
        self.handle
            .disconnect(Disconnect::ByApplication, "", "English")
            .await
            .map_err(|e| SchedulerError::Connection {
                adaptor: ADAPTOR.to_string(),
                message: e.to_string(),
            })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
