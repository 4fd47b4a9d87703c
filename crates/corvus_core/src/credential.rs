use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Credential material handed to the remote channel layer.
#[derive(Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Credential {
    /// Use the current user name and the default private keys in `~/.ssh`.
    #[default]
    Default,
    Password {
        username: String,
        password: String,
    },
    /// A private key file, optionally protected by a passphrase.
    Certificate {
        username: String,
        key_file: PathBuf,
        passphrase: Option<String>,
    },
}

impl Credential {
    pub fn username(&self) -> Option<&str> {
        match self {
            Credential::Default => None,
            Credential::Password { username, .. } | Credential::Certificate { username, .. } => {
                Some(username)
            }
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Default => write!(f, "Default"),
            Credential::Password { username, .. } => f
                .debug_struct("Password")
                .field("username", username)
                .field("password", &"***")
                .finish(),
            Credential::Certificate {
                username, key_file, ..
            } => f
                .debug_struct("Certificate")
                .field("username", username)
                .field("key_file", key_file)
                .finish_non_exhaustive(),
        }
    }
}
