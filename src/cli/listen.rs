use super::config::CourierConfig;
use super::context::Context;
use courier::messenger::ListenerStatus;
use tracing::info;

/// Run the listener pool until Ctrl-C
///
/// Every stored account gets one listener. Listeners that fail to connect
/// keep retrying with backoff; revoked credentials stop and are reported.
pub async fn execute(config: CourierConfig) -> Result<(), Box<dyn std::error::Error>> {
    println!("🚀 Starting courier listeners...");
    println!("Database: {}", config.database.path.display());
    println!("Gateway: {}", config.network.gateway_url);
    println!();

    let context = Context::open(config).await?;
    let pool = context.listener_pool();
    let report = pool.start().await?;

    if report.entries.is_empty() {
        println!("No stored accounts. Use `courier login --phone <number>` first.");
        context.store.close().await;
        return Ok(());
    }

    println!(
        "Listening: {} running, {} reconnecting, {} stopped",
        report.count(ListenerStatus::Running),
        report.count(ListenerStatus::Reconnecting),
        report.count(ListenerStatus::Stopped),
    );
    for entry in report.failures() {
        println!(
            "   ⚠️  {}: {}",
            entry.account_identifier,
            entry.last_error.as_deref().unwrap_or("not connected")
        );
    }
    println!();
    println!("Press Ctrl-C to stop.");

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    println!();
    println!("Stopping listeners...");

    pool.stop().await;
    for entry in pool.snapshot() {
        println!(
            "   {}: {} messages stored, {} reconnects",
            entry.account_identifier, entry.messages_stored, entry.reconnects
        );
    }
    context.store.close().await;
    Ok(())
}
