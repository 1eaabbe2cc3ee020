// lib.rs - traveldot shared core

#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::too_many_lines)]

pub mod app;
pub mod capabilities;
pub mod config;
pub mod editor;
pub mod error;
pub mod image_processing;
pub mod journal;
pub mod markers;
pub mod model;
pub mod store;
pub mod sync;
pub mod upload;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use app::{App, Event, Followup, Model, ViewModel};
pub use capabilities::{Capabilities, Effect, Services};
pub use config::{ConfigError, JournalConfig};
pub use crux_core::{render::Render, App as CruxApp};
pub use error::{AppError, AppResult, ErrorKind, ErrorSeverity};
pub use journal::{DeleteOutcome, Journal, SaveOutcome};

#[must_use]
pub fn get_current_time_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// A poisoned lock only means another thread panicked mid-update; the
/// state it guards is still the best we have.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
