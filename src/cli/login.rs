use super::config::CourierConfig;
use super::context::Context;
use courier::messenger::{AuthError, VerifyOutcome};
use courier::store::Account;
use std::io::{self, BufRead, Write};

/// Log an account in from the terminal
///
/// Requests a code for `phone`, reads it from stdin and, when the account
/// has a second factor, reads the password without echo. The resulting
/// credential is stored in the database; a running `courier listen` picks
/// it up on its next start.
pub async fn execute(config: CourierConfig, phone: String) -> Result<(), Box<dyn std::error::Error>> {
    let context = Context::open(config).await?;
    let auth = context.auth_service();

    println!("📨 Requesting verification code for {}...", phone);
    let requested = auth.request_code(&phone).await.map_err(describe)?;
    println!(
        "   Code sent. It stays valid for {} seconds.",
        requested.code_valid_seconds
    );
    println!();

    let code = prompt_line("Enter verification code: ")?;
    let mut outcome = auth
        .verify_code(&phone, &code, &requested.challenge_token)
        .await
        .map_err(describe)?;

    if outcome == VerifyOutcome::SecondFactorRequired {
        println!("🔐 This account has a second-factor password.");
        let password = rpassword::prompt_password("Enter password: ")
            .map_err(|e| format!("Failed to read password from stdin: {}", e))?;
        outcome = auth
            .submit_password(&phone, &password, &requested.challenge_token)
            .await
            .map_err(describe)?;
    }

    match outcome {
        VerifyOutcome::Authenticated(account) => {
            print_account(&account);
            context.store.close().await;
            Ok(())
        }
        VerifyOutcome::SecondFactorRequired => Err("Login did not complete".into()),
    }
}

fn print_account(account: &Account) {
    println!();
    println!("✅ Logged in as {}", account.identifier);
    println!("   Registered: {}", account.registered_at.to_rfc3339());
    println!("   Credential: {}", account.credential.fingerprint());
}

/// Terminal wording for login failures
fn describe(e: AuthError) -> String {
    match e {
        AuthError::InvalidCode | AuthError::ExpiredCode | AuthError::InvalidPassword => {
            format!("{}. Run `courier login` again to get a new code.", e)
        }
        other => other.to_string(),
    }
}

fn prompt_line(prompt: &str) -> Result<String, Box<dyn std::error::Error>> {
    print!("{}", prompt);
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().lock().read_line(&mut input)?;
    let input = input.trim().to_string();
    if input.is_empty() {
        return Err("Verification code cannot be empty".into());
    }
    Ok(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_suggests_retry_for_rejected_code() {
        let message = describe(AuthError::InvalidCode);
        assert!(message.starts_with("Invalid verification code"));
        assert!(message.contains("courier login"));
    }

    #[test]
    fn test_describe_passes_other_errors_through() {
        let message = describe(AuthError::InvalidInput("phone must not be empty".into()));
        assert_eq!(message, "Invalid input: phone must not be empty");
    }
}
