use super::config::CourierConfig;
use courier::store::{Account, AccountRepository, SqliteStore};

/// List stored accounts
///
/// Credentials are never printed; the fingerprint identifies which
/// credential is stored without revealing it.
pub async fn execute(config: CourierConfig) -> Result<(), Box<dyn std::error::Error>> {
    let store = SqliteStore::open(&config.database.path).await?;
    let accounts = store.list().await?;

    if accounts.is_empty() {
        println!("No stored accounts.");
    } else {
        println!("{} stored account(s):", accounts.len());
        for account in &accounts {
            let messages = store.message_count(&account.identifier).await?;
            println!("  {}", format_account(account, messages));
        }
    }

    store.close().await;
    Ok(())
}

fn format_account(account: &Account, messages: u64) -> String {
    format!(
        "{:<16} registered {}  credential {}  {} message(s)",
        account.identifier,
        account.registered_at.format("%Y-%m-%d %H:%M:%S UTC"),
        account.credential.fingerprint(),
        messages
    )
}
