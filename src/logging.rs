/*!
 * Logging and tracing initialization
 */

use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::error::{OssError, Result};

/// Initialize structured logging for applications embedding the SDK.
///
/// Library code only emits `tracing` events; it never installs a
/// subscriber on its own. Applications that want the SDK's log output
/// without wiring their own subscriber can call this once at startup.
pub fn init_logging(default_level: &str) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("oss_client={}", default_level)))
        .map_err(|e| OssError::Client(format!("Failed to create log filter: {}", e)))?;

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(false)
        .with_line_number(false)
        .with_span_events(FmtSpan::NONE)
        .compact();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| OssError::Client(format!("Failed to install subscriber: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_installs_once() {
        init_logging("debug").unwrap();
        // A second install must fail cleanly instead of panicking
        assert!(init_logging("debug").is_err());
    }
}
