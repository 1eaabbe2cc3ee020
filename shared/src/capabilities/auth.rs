use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::{AppError, ErrorKind};
use crate::model::UserId;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: UserId,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("email already in use")]
    EmailInUse,
    #[error("password too weak")]
    WeakPassword,
    #[error("wrong email or password")]
    WrongCredentials,
    #[error("auth provider unreachable: {0}")]
    Network(String),
    #[error("auth failed: {0}")]
    Other(String),
}

impl From<AuthError> for AppError {
    fn from(e: AuthError) -> Self {
        let kind = match e {
            AuthError::EmailInUse => ErrorKind::EmailInUse,
            AuthError::WeakPassword => ErrorKind::WeakPassword,
            AuthError::WrongCredentials => ErrorKind::WrongCredentials,
            AuthError::Network(_) => ErrorKind::Network,
            AuthError::Other(_) => ErrorKind::Authentication,
        };
        AppError::new(kind, e.to_string())
    }
}

#[async_trait::async_trait]
pub trait AuthProvider: Send + Sync {
    async fn sign_up(&self, email: &str, password: &SecretString) -> Result<AuthUser, AuthError>;
    async fn sign_in(&self, email: &str, password: &SecretString) -> Result<AuthUser, AuthError>;
    async fn sign_out(&self) -> Result<(), AuthError>;
    async fn send_password_reset(&self, email: &str) -> Result<(), AuthError>;

    fn current_user(&self) -> Option<AuthUser>;

    /// Current-user-changed notifications.
    fn watch(&self) -> watch::Receiver<Option<AuthUser>>;
}
