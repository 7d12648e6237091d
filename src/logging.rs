use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

type FormatLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// JSON for production, compact for terminals.
fn format_layer(log_format: &str) -> FormatLayer {
    match log_format {
        "json" => fmt::layer()
            .json()
            .with_current_span(true)
            .with_target(true)
            .with_file(false)
            .with_line_number(false)
            .boxed(),
        _ => fmt::layer().compact().with_target(true).boxed(),
    }
}

/// Initialize tracing. `RUST_LOG` takes precedence over `log_level`.
pub fn init(log_format: &str, log_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(format_layer(log_format))
        .with(env_filter)
        .init();
}
