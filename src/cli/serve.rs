use super::config::CourierConfig;
use super::context::Context;
use courier::api::{create_router, AppState};
use courier::messenger::{AuthFlowStore, ListenerStatus};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Run the HTTP API until Ctrl-C
///
/// With `--with-listeners` the listener pool runs in the same process and
/// accounts that log in through the API start listening immediately.
/// Expired pending logins are swept every `[auth] sweep_interval`.
pub async fn execute(
    config: CourierConfig,
    bind: Option<String>,
    with_listeners: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = match bind {
        Some(bind) => bind
            .parse()
            .map_err(|e| format!("Invalid bind address '{}': {}", bind, e))?,
        None => config.bind_addr()?,
    };
    let sweep_interval = config.auth.sweep_interval;

    let context = Context::open(config).await?;
    let auth = Arc::new(context.auth_service());

    let pool = if with_listeners {
        let pool = Arc::new(context.listener_pool());
        let report = pool.start().await?;
        info!(
            running = report.count(ListenerStatus::Running),
            reconnecting = report.count(ListenerStatus::Reconnecting),
            stopped = report.count(ListenerStatus::Stopped),
            "listener pool started"
        );
        Some(pool)
    } else {
        None
    };

    let shutdown = CancellationToken::new();
    let sweeper = tokio::spawn(sweep_flows(
        auth.flows().clone(),
        sweep_interval,
        shutdown.child_token(),
    ));

    let state = Arc::new(AppState {
        auth,
        actions: Arc::new(context.action_service()),
        pool: pool.clone(),
    });

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| format!("Failed to bind {}: {}", addr, e))?;
    let local_addr = listener.local_addr()?;
    info!(addr = %local_addr, listeners = with_listeners, "courier API listening");
    println!("🌐 Courier API listening on http://{}", local_addr);

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
        })
        .await?;

    shutdown.cancel();
    let _ = sweeper.await;
    if let Some(pool) = pool {
        pool.stop().await;
    }
    context.store.close().await;
    Ok(())
}

/// Drop expired pending logins until cancelled.
async fn sweep_flows(flows: Arc<AuthFlowStore>, every: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(every);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let removed = flows.sweep_expired().await;
                if removed > 0 {
                    debug!(removed, remaining = flows.len(), "swept expired logins");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier::messenger::pending::PendingAuth;
    use courier::messenger::{Connector, MockNetwork};

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_drops_expired_flows() {
        let network = MockNetwork::new();
        let connection = network.connect(None).await.unwrap();
        let flows = Arc::new(AuthFlowStore::new());
        flows
            .put(PendingAuth::new(
                "+15550001".to_string(),
                "challenge".to_string(),
                Duration::from_secs(30),
                connection,
            ))
            .await;

        let cancel = CancellationToken::new();
        let task = tokio::spawn(sweep_flows(
            flows.clone(),
            Duration::from_secs(10),
            cancel.clone(),
        ));

        tokio::time::sleep(Duration::from_secs(15)).await;
        assert_eq!(flows.len(), 1);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(flows.is_empty());
        assert_eq!(network.open_connections(), 0);

        cancel.cancel();
        task.await.unwrap();
    }
}
