pub mod auth;
pub mod config;
pub mod env;
pub mod evaluator;
pub mod executor;
pub mod report;
pub mod runner;
pub mod suite;

/// Installs the tracing subscriber. `RUST_LOG` takes precedence over `level`.
/// Logs go to stderr; stdout carries the report.
pub fn init_logging(level: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("smokepit={level}")));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(filter)
        .init();
}
