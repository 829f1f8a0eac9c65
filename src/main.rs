//! intelstream service entrypoint.
//! Loads settings, wires the pipeline and serves the admin router on Shuttle.

use shuttle_axum::ShuttleAxum;

use intelstream::app;
use intelstream::config::Settings;
use intelstream::logging::init_tracing;

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();

    let settings = Settings::from_env()?;
    init_tracing(&settings.log_level, settings.log_json);

    let app = app::build(settings).await?;
    tracing::info!(loops = app.tasks.len(), "intelstream started");

    // The loops stop once the sender is dropped or signalled, so it lives in
    // the signal task for the life of the process.
    let shutdown = app.shutdown;
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown requested");
            let _ = shutdown.send(true);
        }
        shutdown.closed().await;
    });

    Ok(app.router.into())
}
