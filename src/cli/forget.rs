use super::config::CourierConfig;
use courier::store::{AccountRepository, SqliteStore};
use std::io::{self, Write};

/// Remove a stored account, its credential and its recorded messages
///
/// Only local data is removed; the session stays valid on the network until
/// it is terminated from another device. A listener already running for the
/// account keeps its connection until that process restarts.
pub async fn execute(
    config: CourierConfig,
    account: String,
    yes: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = SqliteStore::open(&config.database.path).await?;

    if store.get(&account).await?.is_none() {
        store.close().await;
        return Err(format!("No stored account '{}'", account).into());
    }

    if !yes && !confirm_action(&format!("Type '{}' to confirm removal: ", account), &account)? {
        println!("Aborted.");
        store.close().await;
        return Ok(());
    }

    let removed = store.remove(&account).await?;
    store.close().await;

    if removed {
        println!("🗑️  Removed {}", account);
    } else {
        println!("{} was already removed.", account);
    }
    Ok(())
}

/// Whether the typed confirmation matches, ignoring surrounding whitespace
pub fn parse_confirmation(input: &str, expected: &str) -> bool {
    input.trim() == expected
}

fn confirm_action(prompt: &str, expected: &str) -> Result<bool, Box<dyn std::error::Error>> {
    print!("{}", prompt);
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;

    Ok(parse_confirmation(&input, expected))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_confirmation() {
        assert!(parse_confirmation("+15551234567\n", "+15551234567"));
        assert!(parse_confirmation("  +15551234567  ", "+15551234567"));
        assert!(!parse_confirmation("+1555123456\n", "+15551234567"));
        assert!(!parse_confirmation("", "+15551234567"));
    }
}
