//! services/api/src/web/state.rs
//!
//! Defines the application's shared state.

use std::sync::Arc;

use crate::config::Config;
use crate::files::FileVault;
use tutor_core::ports::{ChatStore, OcrService, TutorService};

/// The shared application state, created once at startup and passed to all handlers.
///
/// Handlers receive every collaborator through this struct; there is no
/// process-wide mutable state outside of it.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ChatStore>,
    pub tutor: Arc<dyn TutorService>,
    pub ocr: Arc<dyn OcrService>,
    pub vault: FileVault,
    pub config: Arc<Config>,
}
