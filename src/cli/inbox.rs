use super::config::CourierConfig;
use courier::store::{AccountRepository, ChatMessage, SqliteStore};

/// Print the most recent messages recorded for an account, oldest first
pub async fn execute(
    config: CourierConfig,
    account: String,
    limit: u32,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = SqliteStore::open(&config.database.path).await?;

    if store.get(&account).await?.is_none() {
        store.close().await;
        return Err(format!("No stored account '{}'", account).into());
    }

    let messages = store.recent_messages(&account, limit).await?;
    if messages.is_empty() {
        println!("No messages recorded for {}.", account);
    }
    for message in &messages {
        println!("{}", format_message(message));
    }

    store.close().await;
    Ok(())
}

fn format_message(message: &ChatMessage) -> String {
    format!(
        "[{}] {}: {}",
        message.received_at.format("%Y-%m-%d %H:%M:%S"),
        message.sender_display,
        message.body
    )
}
