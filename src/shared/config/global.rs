use std::sync::Arc;

use once_cell::sync::Lazy;
use tracing::warn;

use crate::shared::config::model::{Settings, load_settings};

/// Process-wide settings, loaded on first use.
///
/// A file or environment value that fails to load falls back to the
/// built-in defaults; the failure is logged.
pub static CONFIG: Lazy<Arc<Settings>> = Lazy::new(|| match load_settings() {
    Ok(settings) => Arc::new(settings),
    Err(err) => {
        warn!(target: "snel_reduce::config", error = %err, "Using default settings");
        Arc::new(Settings::default())
    }
});
