use std::process::ExitCode;
use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use pitchside::{App, Config, Server};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "fatal");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;
    info!(?config, "configuration loaded");

    let app = Arc::new(App::from_config(&config)?);
    if let Some(every) = config.cache_sweep {
        app.cache().spawn_sweeper(every);
    }
    let pipeline = app.pipeline();

    let server = Server::bind(config.listen_addr()).await?;
    server
        .run_with_shutdown(
            move |req| {
                let pipeline = pipeline.clone();
                async move { pipeline.handle(req).await }
            },
            async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!(error = %e, "failed to listen for shutdown signal");
                    std::future::pending::<()>().await;
                }
            },
        )
        .await?;

    info!(stats = ?app.stats(), "stopped");
    Ok(())
}
