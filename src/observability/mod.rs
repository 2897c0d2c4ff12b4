// Observability infrastructure using tracing crate
// Structured JSON logging for the container and per-request spans

use anyhow::{Context as _, Result};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

const DEFAULT_FILTER: &str = "pear_container=info,hyper=warn";
const VERBOSE_FILTER: &str = "pear_container=debug,hyper=info";

/// Initialize the observability system.
/// `RUST_LOG` takes precedence over the verbosity flag.
pub fn init(verbose: bool) -> Result<()> {
    let fmt_layer = fmt::layer()
        .json()
        .with_target(true)
        .with_current_span(true)
        .with_span_list(true)
        .with_thread_ids(true)
        .with_span_events(FmtSpan::CLOSE);

    // Example: RUST_LOG=pear_container::wrapper=trace
    let default = if verbose { VERBOSE_FILTER } else { DEFAULT_FILTER };
    let filter_layer = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default))
        .context("failed to create tracing filter")?;

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .try_init()
        .context("a global tracing subscriber is already installed")?;

    Ok(())
}

/// Span covering one request from host entry to response
#[inline]
pub fn request_span(method: &str, uri: &str) -> tracing::Span {
    tracing::info_span!(
        "request",
        method = method,
        uri = uri,
        request_id = %uuid::Uuid::new_v4(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filters_parse() {
        assert!(EnvFilter::try_new(DEFAULT_FILTER).is_ok());
        assert!(EnvFilter::try_new(VERBOSE_FILTER).is_ok());
    }
}
