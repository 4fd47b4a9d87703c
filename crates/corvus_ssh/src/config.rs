use std::fmt;
use std::time::Duration;

use corvus_core::prelude::*;
use corvus_local::config::QueueConfig;
use serde::Deserialize;

use crate::ADAPTOR;

pub const DEFAULT_PORT: u16 = 22;

/// A `[user@]host[:port]` address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub user: Option<String>,
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            user: None,
            host: host.into(),
            port,
        }
    }

    /// Parses `[user@]host[:port]`. IPv6 hosts go in brackets: `[::1]:2222`.
    pub fn parse(location: &str) -> Result<Self, SchedulerError> {
        let location = location.trim();
        let invalid = |why: &str| {
            SchedulerError::adaptor(ADAPTOR, format!("Invalid location '{location}': {why}"))
        };

        let (user, rest) = match location.rsplit_once('@') {
            Some((user, rest)) if !user.is_empty() => (Some(user.to_string()), rest),
            Some(_) => return Err(invalid("empty user name")),
            None => (None, location),
        };

        let (host, port) = if let Some(bracketed) = rest.strip_prefix('[') {
            let (host, tail) = bracketed
                .split_once(']')
                .ok_or_else(|| invalid("unterminated '['"))?;
            (host, tail.strip_prefix(':'))
        } else {
            match rest.split_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (rest, None),
            }
        };

        if host.is_empty() {
            return Err(invalid("missing host"));
        }

        let port = match port {
            Some(port) => port.parse().map_err(|_| invalid("bad port"))?,
            None => DEFAULT_PORT,
        };

        Ok(Self {
            user,
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(user) = &self.user {
            write!(f, "{user}@")?;
        }
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub credential: Credential,
    /// Jump host (`[user@]host[:port]`) the target is reached through.
    pub gateway: Option<String>,
    /// Channels opened on one session before another session is created.
    pub max_channels: usize,
    /// Refuse hosts whose key is not in `~/.ssh/known_hosts`.
    pub strict_host_key_checking: bool,
    pub connect_timeout_secs: u64,
    /// Remote directory relative job paths are resolved against. Defaults to the
    /// remote home directory.
    pub working_directory: Option<String>,
    #[serde(flatten)]
    pub queues: QueueConfig,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            username: None,
            credential: Credential::Default,
            gateway: None,
            max_channels: 7,
            strict_host_key_checking: false,
            connect_timeout_secs: 10,
            working_directory: None,
            queues: QueueConfig::default(),
        }
    }
}

impl SshConfig {
    pub fn from_location(location: &str) -> Result<Self, SchedulerError> {
        let endpoint = Endpoint::parse(location)?;
        Ok(Self {
            host: endpoint.host,
            port: endpoint.port,
            username: endpoint.user,
            ..Default::default()
        })
    }

    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.credential = credential;
        self
    }

    pub fn with_gateway(mut self, gateway: impl Into<String>) -> Self {
        self.gateway = Some(gateway.into());
        self
    }

    pub fn location(&self) -> String {
        Endpoint::new(&self.host, self.port).to_string()
    }

    pub fn target(&self) -> Endpoint {
        Endpoint {
            user: self.username.clone(),
            host: self.host.clone(),
            port: self.port,
        }
    }

    pub fn gateway_endpoint(&self) -> Result<Option<Endpoint>, SchedulerError> {
        self.gateway.as_deref().map(Endpoint::parse).transpose()
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// The user to log in as: the location's user, then the credential's, then the
    /// local user.
    pub fn user_for(&self, endpoint: &Endpoint) -> String {
        endpoint
            .user
            .clone()
            .or_else(|| self.credential.username().map(str::to_string))
            .or_else(|| std::env::var("USER").ok())
            .unwrap_or_else(|| "root".to_string())
    }
}
