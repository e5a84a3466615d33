use mark_invoice_core::Application;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    // Logging needs config, and config needs env vars loaded, but a
    // startup failure before logging is initialized still needs to be
    // visible — so config errors here go to stderr directly.
    let config = match mark_invoice_core::AppConfig::from_env() {
        Ok(config) => Arc::new(config),
        Err(e) => {
            eprintln!("fatal: failed to load configuration: {e}");
            std::process::exit(1);
        }
    };
    let _guard = mark_invoice_core::logging::init_logging(&config);

    match Application::boot(config, None).await {
        Ok(app) => {
            if let Err(e) = app.run().await {
                tracing::error!(error = %e, "fatal error during shutdown");
                std::process::exit(1);
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "fatal error during startup");
            std::process::exit(1);
        }
    }
}
