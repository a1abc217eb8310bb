use tracing::info;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

use crate::shared::config::{CONFIG, LoggingConfig};

/// Installs the process-wide subscriber from the global `[logging]` section.
pub fn init() -> anyhow::Result<()> {
    init_with(&CONFIG.logging)
}

/// Stdout layer plus a daily-rolling file layer under `log_dir`.
///
/// Fails when either level does not parse or a subscriber is already set.
pub fn init_with(cfg: &LoggingConfig) -> anyhow::Result<()> {
    let stdout_filter = cfg.stdout_level.parse::<LevelFilter>()?;
    let file_filter = cfg.file_level.parse::<LevelFilter>()?;

    let file_appender = tracing_appender::rolling::daily(&cfg.log_dir, "snel_reduce.log");
    tracing_subscriber::registry()
        .with(fmt::layer().with_ansi(true).with_filter(stdout_filter))
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_writer(file_appender)
                .with_filter(file_filter),
        )
        .try_init()?;

    info!(
        target: "snel_reduce::logging",
        log_dir = %cfg.log_dir,
        stdout = %stdout_filter,
        file = %file_filter,
        "Logging initialized"
    );
    Ok(())
}

#[cfg(test)]
pub fn init_for_tests() {
    use std::sync::Once;
    use tracing_subscriber::EnvFilter;

    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("snel_reduce=debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}
