//! Credential record and its line-store encoding

use common::Secret;

use crate::error::{Error, Result};
use crate::pool::MIN_USABLE_BALANCE;

/// Field separator in the durable line store.
const SEPARATOR: &str = "----";

/// One pooled account.
///
/// `balance` is a cached credit amount, always >= 0. A balance of exactly
/// zero marks the account disabled; it is skipped by selection until an
/// operator resets it. The password and session token are wrapped so a
/// derived Debug cannot leak them.
#[derive(Debug, Clone)]
pub struct Account {
    pub email: String,
    pub password: Secret<String>,
    pub session: Secret<String>,
    pub project_id: String,
    pub balance: f64,
}

impl Account {
    /// Parse one store line: `email----password----session----project_id----balance`.
    ///
    /// A line with the wrong field count is an error (callers skip it and
    /// keep loading). An unparseable balance degrades to 0.0, marking the
    /// account disabled rather than rejecting the whole record.
    pub fn parse_line(line: &str) -> Result<Self> {
        let fields: Vec<&str> = line.split(SEPARATOR).collect();
        if fields.len() < 5 {
            return Err(Error::MalformedLine(fields.len()));
        }
        let balance = fields[4].trim().parse::<f64>().unwrap_or(0.0).max(0.0);
        Ok(Self {
            email: fields[0].to_string(),
            password: Secret::new(fields[1].to_string()),
            session: Secret::new(fields[2].to_string()),
            project_id: fields[3].to_string(),
            balance,
        })
    }

    /// Encode the record back to its store line, balance at fixed
    /// 4-decimal precision.
    pub fn to_line(&self) -> String {
        format!(
            "{}{SEPARATOR}{}{SEPARATOR}{}{SEPARATOR}{}{SEPARATOR}{:.4}",
            self.email,
            self.password.expose(),
            self.session.expose(),
            self.project_id,
            self.balance
        )
    }

    /// Whether the cached balance clears the usability threshold.
    pub fn usable(&self) -> bool {
        self.balance > MIN_USABLE_BALANCE
    }

    /// Whether the account is disabled (confirmed or forced empty).
    pub fn disabled(&self) -> bool {
        self.balance == 0.0
    }

    /// Status label for the operator summary.
    pub fn status_label(&self) -> &'static str {
        if self.disabled() {
            "disabled"
        } else if self.usable() {
            "available"
        } else {
            "low_balance"
        }
    }
}
