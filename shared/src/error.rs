use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorSeverity {
    Transient,
    Permanent,
    Fatal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Validation,
    FileTooLarge,
    UnsupportedFileType,
    Offline,
    MissingContext,
    UploadTimeout,
    SaveTimeout,
    AllUploadsFailed,
    PermissionDenied,
    Network,
    NotFound,
    ImageProcessing,
    EmailInUse,
    WeakPassword,
    WrongCredentials,
    Authentication,
    Location,
    LocationPermissionDenied,
    Internal,
}

impl ErrorKind {
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Validation => "VALIDATION_ERROR",
            Self::FileTooLarge => "FILE_TOO_LARGE",
            Self::UnsupportedFileType => "UNSUPPORTED_FILE_TYPE",
            Self::Offline => "OFFLINE",
            Self::MissingContext => "MISSING_CONTEXT",
            Self::UploadTimeout => "UPLOAD_TIMEOUT",
            Self::SaveTimeout => "SAVE_TIMEOUT",
            Self::AllUploadsFailed => "ALL_UPLOADS_FAILED",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::Network => "NETWORK_ERROR",
            Self::NotFound => "NOT_FOUND",
            Self::ImageProcessing => "IMAGE_PROCESSING_ERROR",
            Self::EmailInUse => "EMAIL_IN_USE",
            Self::WeakPassword => "WEAK_PASSWORD",
            Self::WrongCredentials => "WRONG_CREDENTIALS",
            Self::Authentication => "AUTH_ERROR",
            Self::Location => "LOCATION_ERROR",
            Self::LocationPermissionDenied => "LOCATION_PERMISSION_DENIED",
            Self::Internal => "INTERNAL_ERROR",
        }
    }

    #[must_use]
    pub const fn default_severity(self) -> ErrorSeverity {
        match self {
            Self::Offline
            | Self::UploadTimeout
            | Self::SaveTimeout
            | Self::AllUploadsFailed
            | Self::Network
            | Self::Location => ErrorSeverity::Transient,

            Self::Internal => ErrorSeverity::Fatal,

            Self::Validation
            | Self::FileTooLarge
            | Self::UnsupportedFileType
            | Self::MissingContext
            | Self::PermissionDenied
            | Self::NotFound
            | Self::ImageProcessing
            | Self::EmailInUse
            | Self::WeakPassword
            | Self::WrongCredentials
            | Self::Authentication
            | Self::LocationPermissionDenied => ErrorSeverity::Permanent,
        }
    }

    /// Hint for the UI only. Nothing in this crate retries on its own.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::Offline
                | Self::UploadTimeout
                | Self::SaveTimeout
                | Self::AllUploadsFailed
                | Self::Network
                | Self::Location
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppError {
    pub kind: ErrorKind,
    pub severity: ErrorSeverity,
    pub message: String,
    pub internal_message: Option<String>,
    pub context: HashMap<String, String>,
}

impl AppError {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity: kind.default_severity(),
            message: message.into(),
            internal_message: None,
            context: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_internal(mut self, internal: impl Into<String>) -> Self {
        self.internal_message = Some(internal.into());
        self
    }

    #[must_use]
    pub fn with_severity(mut self, severity: ErrorSeverity) -> Self {
        self.severity = severity;
        self
    }

    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.kind.code()
    }

    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.kind.is_retryable() && !matches!(self.severity, ErrorSeverity::Fatal)
    }

    #[must_use]
    pub const fn is_permission_denied(&self) -> bool {
        matches!(self.kind, ErrorKind::PermissionDenied)
    }

    #[must_use]
    pub fn user_facing_message(&self) -> String {
        match self.kind {
            ErrorKind::Validation => self.message.clone(),
            ErrorKind::FileTooLarge => {
                let limit_mb = self
                    .context
                    .get("max_bytes")
                    .and_then(|v| v.parse::<u64>().ok())
                    .map_or(10, |b| b / (1024 * 1024));
                format!("The photo is too large. Please choose one smaller than {limit_mb} MB.")
            }
            ErrorKind::UnsupportedFileType => {
                "This file type is not supported. Please choose a JPEG, PNG, or WebP photo.".into()
            }
            ErrorKind::Offline => {
                "You are offline. Please check your network connection.".into()
            }
            ErrorKind::MissingContext => "No signed-in user or current trip was found.".into(),
            ErrorKind::UploadTimeout => {
                "Photo upload is responding slowly. Please check your network and try again."
                    .into()
            }
            ErrorKind::SaveTimeout => {
                "Saving is taking too long. The network may be unstable; please wait and retry."
                    .into()
            }
            ErrorKind::AllUploadsFailed => {
                "All photos failed to upload. Please check your network or file formats.".into()
            }
            ErrorKind::PermissionDenied => {
                "You don't have permission to save this data.".into()
            }
            ErrorKind::Network => {
                "Unable to connect. Please check your internet connection and try again.".into()
            }
            ErrorKind::NotFound => "The requested item could not be found.".into(),
            ErrorKind::ImageProcessing => {
                "Unable to process the image. Please try a different photo.".into()
            }
            ErrorKind::EmailInUse => {
                "This email is already in use. Please sign in or use another email.".into()
            }
            ErrorKind::WeakPassword => "The password is too weak.".into(),
            ErrorKind::WrongCredentials => "Incorrect email or password.".into(),
            ErrorKind::Authentication => "Please sign in again.".into(),
            ErrorKind::Location => {
                "Unable to determine your location. Please check your GPS settings.".into()
            }
            ErrorKind::LocationPermissionDenied => {
                "Location access is required. Please enable location permissions in Settings."
                    .into()
            }
            ErrorKind::Internal => {
                if self.message.is_empty() {
                    "An unexpected error occurred. Please try again.".into()
                } else {
                    format!("Save failed: {}", self.message)
                }
            }
        }
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code(), self.message)?;
        if let Some(internal) = &self.internal_message {
            write!(f, " (internal: {internal})")?;
        }
        Ok(())
    }
}

impl std::error::Error for AppError {}

pub type AppResult<T> = Result<T, AppError>;
