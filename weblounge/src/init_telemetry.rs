use anyhow::Result;
use tracing::{info, Subscriber};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{layer::SubscriberExt, registry::LookupSpan, Layer};
use tracing_subscriber::{registry, EnvFilter};

pub fn build_reduced_logger_text<S>(traces: bool) -> Box<dyn Layer<S> + Send + Sync + 'static>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let span_events = if traces {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };
    if cfg!(debug_assertions) {
        Box::new(
            tracing_subscriber::fmt::layer()
                .with_line_number(false)
                .with_thread_names(false)
                .with_timer(tracing_subscriber::fmt::time::SystemTime)
                .with_target(true)
                .with_span_events(span_events)
                .event_format(tracing_subscriber::fmt::format().compact()),
        )
    } else {
        Box::new(
            tracing_subscriber::fmt::layer()
                .with_span_events(span_events)
                .with_timer(tracing_subscriber::fmt::time::SystemTime)
                .with_target(true),
        )
    }
}

/// `RUST_LOG` if set, `warn` otherwise
pub fn build_loglevel_filter_layer() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
}

/// Whether the comma separated telemetry setting asks for span events
fn traces_enabled(settings: &Option<String>) -> bool {
    settings
        .as_ref()
        .map(|s| s.to_lowercase().split(',').any(|s| s.trim() == "traces"))
        .unwrap_or(false)
}

pub fn init_telemetry_and_tracing(settings: &Option<String>) -> Result<()> {
    let traces = traces_enabled(settings);

    let subscriber = registry()
        .with(build_loglevel_filter_layer())
        .with(build_reduced_logger_text(traces));
    tracing::subscriber::set_global_default(subscriber)?;

    info!("init logging & tracing (span events: {})", traces);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_traces_enabled() {
        assert!(traces_enabled(&Some("metrics, Traces".to_string())));
        assert!(!traces_enabled(&Some("metrics".to_string())));
        assert!(!traces_enabled(&None));
    }
}
