//! Token command implementations

use anyhow::{Context, Result};

use dm_core::error::TokenError;
use dm_core::TokenService;

use crate::exit::ExitStatus;
use crate::output::{format_token_record, print_error, print_info, print_success, print_warning};

/// Mint a token and print the plaintext
///
/// The plaintext goes to stdout alone so scripts can capture it.
pub fn token_mint(tokens: &TokenService) -> Result<ExitStatus> {
    let token = tokens.mint().context("Failed to mint token")?;
    println!("{}", token);
    Ok(ExitStatus::Success)
}

/// Check a token without consuming it
pub fn token_verify(tokens: &TokenService, candidate: &str) -> Result<ExitStatus> {
    let status = tokens.inspect(candidate).context("Failed to read token store")?;
    match status.into_result() {
        Ok(()) => {
            print_success("Token is valid");
            Ok(ExitStatus::Success)
        }
        Err(e) => {
            print_error(&e.to_string());
            Ok(ExitStatus::Failure)
        }
    }
}

/// Validate and consume a token
pub fn token_redeem(tokens: &TokenService, candidate: &str) -> Result<ExitStatus> {
    match tokens.redeem(candidate) {
        Ok(()) => {
            print_success("Token redeemed");
            Ok(ExitStatus::Success)
        }
        Err(TokenError::Store(e)) => Err(e).context("Failed to update token store"),
        Err(e) => {
            print_error(&e.to_string());
            Ok(ExitStatus::Failure)
        }
    }
}

/// Delete the token slot
pub fn token_revoke(tokens: &TokenService) -> Result<ExitStatus> {
    if tokens.revoke() {
        print_success("Token revoked");
        Ok(ExitStatus::Success)
    } else {
        print_error(&format!("Failed to remove {:?}", tokens.path()));
        Ok(ExitStatus::Failure)
    }
}

/// Show the persisted slot
pub fn token_info(tokens: &TokenService) -> Result<ExitStatus> {
    match tokens.info().context("Failed to read token store")? {
        Some(record) => {
            print_info(&format!("Token file: {:?}", tokens.path()));
            print!("{}", format_token_record(&record, chrono::Utc::now()));
        }
        None => print_warning("No token has been issued"),
    }
    Ok(ExitStatus::Success)
}
