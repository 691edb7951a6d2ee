/// Bearer credential storage and the identity it carries
use crate::error::{ChatError, Result};
use base64::{engine::general_purpose, Engine as _};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Source of the persisted bearer token. A missing token means "do not connect".
pub trait TokenStore: Send + Sync {
    fn load(&self) -> Option<String>;
}

/// Token kept in a plain file, one line
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persist a token, replacing any previous one
    pub fn save(&self, token: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(ChatError::Io)?;
        }
        fs::write(&self.path, token.trim()).map_err(ChatError::Io)?;

        // Best-effort file permissions (0600)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600));
        }
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ChatError::Io(e)),
        }
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> Option<String> {
        match fs::read_to_string(&self.path) {
            Ok(raw) => {
                let token = raw.trim();
                if token.is_empty() {
                    None
                } else {
                    Some(token.to_string())
                }
            }
            Err(e) => {
                debug!("No token at {:?}: {}", self.path, e);
                None
            }
        }
    }
}

/// In-memory token, mostly for embedding and tests
#[derive(Debug, Clone, Default)]
pub struct StaticTokenStore {
    token: Option<String>,
}

impl StaticTokenStore {
    pub fn new(token: Option<String>) -> Self {
        Self { token }
    }
}

impl TokenStore for StaticTokenStore {
    fn load(&self) -> Option<String> {
        self.token.clone().filter(|t| !t.trim().is_empty())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Claims {
    sub: Option<String>,
    user_id: Option<serde_json::Value>,
    id: Option<serde_json::Value>,
    exp: Option<i64>,
}

/// The authenticated user as read from the token payload.
/// The signature is not verified here; the server does that on connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    pub user_id: String,
    pub expires_at: Option<i64>,
}

impl UserIdentity {
    pub fn from_token(token: &str) -> Result<Self> {
        let payload = token
            .split('.')
            .nth(1)
            .ok_or_else(|| ChatError::Auth("token is not a JWT".to_string()))?;

        let bytes = general_purpose::URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .map_err(|e| ChatError::Auth(format!("invalid token payload: {}", e)))?;
        let claims: Claims = serde_json::from_slice(&bytes)
            .map_err(|e| ChatError::Auth(format!("invalid token claims: {}", e)))?;

        let user_id = claims
            .user_id
            .or(claims.id)
            .map(|v| match v {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            })
            .or(claims.sub)
            .ok_or_else(|| ChatError::Auth("token carries no user id".to_string()))?;

        Ok(Self {
            user_id,
            expires_at: claims.exp,
        })
    }

    /// Whether the token has expired at `now` (unix seconds)
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.expires_at.map(|exp| exp <= now).unwrap_or(false)
    }
}
