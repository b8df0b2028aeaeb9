use std::time::Duration;

use actix_web::{dev::Server, http::KeepAlive, middleware::Logger, App, HttpServer};
use log::*;
use loyalty_engine::{accrual::AccrualClient, SqliteDatabase};
use tokio_util::sync::CancellationToken;

use crate::{accrual_worker::start_accrual_worker, config::ServerConfig, errors::ServerError, routes::health};

/// Runs the server until Ctrl-C is received.
///
/// On shutdown the accrual worker is stopped first, so that in-flight polls can still reach the database, and then
/// the HTTP server is stopped gracefully. If the worker does not stop within its shutdown timeout,
/// [`ServerError::AccrualWorkerError`] is returned and the caller should terminate the process.
pub async fn run_server(config: ServerConfig) -> Result<(), ServerError> {
    config.validate()?;
    let db = SqliteDatabase::new_with_url(config.database_url.reveal(), 25)
        .await
        .map_err(|e| ServerError::InitializeError(e.to_string()))?;
    if config.skip_migrations {
        warn!("🚀️ Skipping database migrations");
    } else {
        db.migrate().await.map_err(|e| ServerError::InitializeError(e.to_string()))?;
    }
    let fetcher = AccrualClient::new().map_err(|e| ServerError::InitializeError(e.to_string()))?;

    let shutdown = CancellationToken::new();
    let worker = start_accrual_worker(db.clone(), fetcher, config.accrual.reconciliation_config(), shutdown.clone());
    let srv = create_server_instance(&config)?;
    let handle = srv.handle();
    let mut srv_task = actix_web::rt::spawn(srv);

    let server_exited = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                error!("🚀️ Could not listen for the shutdown signal. {e}");
            }
            info!("🚀️ Shutdown signal received");
            false
        },
        result = &mut srv_task => {
            warn!("🚀️ The HTTP server exited unexpectedly: {result:?}");
            true
        },
    };

    shutdown.cancel();
    let worker_result = match worker.await {
        Ok(result) => result.map_err(ServerError::from),
        Err(e) => Err(ServerError::Unspecified(format!("The accrual worker panicked. {e}"))),
    };
    // A worker that timed out still has polls in flight. Leave the rest to the process exit.
    if let Err(ServerError::AccrualWorkerError(e)) = &worker_result {
        error!("🚀️ {e}");
        return worker_result;
    }
    handle.stop(true).await;
    if !server_exited {
        match srv_task.await {
            Ok(Err(e)) => error!("🚀️ HTTP server error: {e}"),
            Err(e) => error!("🚀️ HTTP server task failed: {e}"),
            Ok(Ok(())) => {},
        }
    }
    db.close().await;
    worker_result
}

pub fn create_server_instance(config: &ServerConfig) -> Result<Server, ServerError> {
    let srv = HttpServer::new(|| {
        App::new().wrap(Logger::new("%t (%D ms) %s %a %{Host}i %U").log_target("loyalty::access_log")).service(health)
    })
    .keep_alive(KeepAlive::Timeout(Duration::from_secs(600)))
    .disable_signals()
    .bind((config.host.as_str(), config.port))?
    .run();
    Ok(srv)
}
