use tracing_subscriber::{fmt, EnvFilter};

use crate::Result;

/// Initialize tracing for the service.
///
/// Default: info for our crates, warn for everything else. Can be overridden with `RUST_LOG`.
pub fn init(service_name: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "warn,ringback=info,ringback_core=info,ringback_http=info,ringback_twilio=info,{service_name}=info"
        ))
    });

    // `try_init` so tests and embedders that already installed a subscriber don't panic.
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(true)
        .try_init();

    Ok(())
}
