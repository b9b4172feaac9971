use miette::{IntoDiagnostic, Result};
use steploom::run_demo::run_demo;
use steploom::runtimes::RuntimeConfig;
use tracing_error::ErrorLayer;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

fn init_tracing(config: &RuntimeConfig) -> Result<()> {
    let fmt_layer = fmt::layer()
        .with_target(false)
        .with_file(false)
        .with_line_number(false);

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_filter))
        .into_diagnostic()?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(ErrorLayer::default())
        .try_init()
        .into_diagnostic()
}

fn init_miette() {
    // Pretty panic reports
    miette::set_panic_hook();
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = RuntimeConfig::from_env()?;
    init_tracing(&config)?;
    init_miette();

    // Very small CLI: cargo run -- [demo]
    let which = std::env::args().nth(1).unwrap_or_else(|| "demo".to_string());
    match which.as_str() {
        "demo" => run_demo(config).await,
        other => {
            println!("Unknown command `{other}`. Available: demo");
            Ok(())
        }
    }
}
