use anyhow::{Context, Result};
use smartev::logging::{get_logger, init_logging};
use smartev::collaborators::Collaborators;
use smartev::{Config, Coordinator};
use tokio::sync::oneshot;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().context("Failed to load configuration")?;
    init_logging(&config.logging).context("Failed to initialize logging")?;
    let logger = get_logger("main");
    logger.info(&format!("SmartEV {} starting", env!("APP_VERSION")));

    let collaborators = build_collaborators(&config)?;
    let (mut coordinator, handle) =
        Coordinator::new(config.clone(), collaborators).context("Invalid configuration")?;

    let (web_stop_tx, web_stop_rx) = oneshot::channel::<()>();
    #[cfg(feature = "web")]
    let web_task = if config.web.enabled {
        let web_handle = handle.clone();
        let (host, port) = (config.web.host.clone(), config.web.port);
        Some(tokio::spawn(async move {
            let shutdown = async {
                let _ = web_stop_rx.await;
            };
            if let Err(e) = smartev::web::serve(web_handle, &host, port, shutdown).await {
                get_logger("web").error(&format!("Web server error: {}", e));
            }
        }))
    } else {
        drop(web_stop_rx);
        None
    };
    #[cfg(not(feature = "web"))]
    drop(web_stop_rx);

    let signal_handle = handle.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        signal_handle.shutdown();
    });

    let result = coordinator.run().await;

    let _ = web_stop_tx.send(());
    #[cfg(feature = "web")]
    if let Some(task) = web_task {
        let _ = task.await;
    }

    match result {
        Ok(()) => {
            logger.info("Shutdown complete");
            Ok(())
        }
        Err(e) => {
            logger.error(&format!("Coordinator failed: {}", e));
            Err(anyhow::anyhow!("Coordinator error: {}", e))
        }
    }
}

#[cfg(feature = "hass")]
fn build_collaborators(config: &Config) -> Result<Collaborators> {
    smartev::hass::collaborators(config).context("Failed to set up Home Assistant")
}

#[cfg(not(feature = "hass"))]
fn build_collaborators(_config: &Config) -> Result<Collaborators> {
    anyhow::bail!("Built without Home Assistant support; no collaborators available")
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};
    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(_) => {
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
