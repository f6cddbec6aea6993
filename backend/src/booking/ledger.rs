use std::sync::Arc;

use tracing::{debug, instrument};

use crate::error::AppError;
use crate::model::Account;
use crate::store::LedgerRepository;
use crate::time::now_ms;

/// Result of a guarded debit. The guard failing is an outcome, not an error,
/// so callers decide between a user-facing rejection and a retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebitOutcome {
    Applied { balance: i64 },
    Insufficient { available: i64 },
}

/// The only writer of learner and relationship balances.
#[derive(Clone)]
pub struct BalanceLedger {
    repo: Arc<dyn LedgerRepository>,
}

impl BalanceLedger {
    pub fn new(repo: Arc<dyn LedgerRepository>) -> Self {
        Self { repo }
    }

    /// Adds `amount`, even to a negative balance. Returns the new balance.
    #[instrument(skip(self), target = "ledger", fields(learner_id = %account.learner_id()))]
    pub async fn credit(&self, account: &Account, amount: i64) -> Result<i64, AppError> {
        ensure_non_negative(amount)?;
        let balance = self
            .repo
            .credit(account, amount, now_ms())
            .await?
            .ok_or_else(|| missing(account))?;

        debug!(amount, balance, "credited");
        Ok(balance)
    }

    /// Subtracts `amount` only if the balance still covers it at write time.
    #[instrument(skip(self), target = "ledger", fields(learner_id = %account.learner_id()))]
    pub async fn debit(&self, account: &Account, amount: i64) -> Result<DebitOutcome, AppError> {
        ensure_non_negative(amount)?;

        if let Some(balance) = self.repo.debit_if_sufficient(account, amount, now_ms()).await? {
            debug!(amount, balance, "debited");
            return Ok(DebitOutcome::Applied { balance });
        }

        // The predicate failed or the account is missing; tell them apart.
        let available = match (self.repo.balance(account).await?, account) {
            (Some(b), _) => b,
            (None, Account::Relationship { .. }) => 0,
            (None, Account::Learner(_)) => return Err(missing(account)),
        };
        debug!(amount, available, "debit refused");
        Ok(DebitOutcome::Insufficient { available })
    }

    /// Unconditional subtraction for amounts already owed; may go negative.
    #[instrument(skip(self), target = "ledger", fields(learner_id = %account.learner_id()))]
    pub async fn charge(&self, account: &Account, amount: i64) -> Result<i64, AppError> {
        ensure_non_negative(amount)?;
        let balance = self
            .repo
            .charge(account, amount, now_ms())
            .await?
            .ok_or_else(|| missing(account))?;

        debug!(amount, balance, "charged");
        Ok(balance)
    }

    /// Current balance; a relationship without a record holds nothing.
    pub async fn balance(&self, account: &Account) -> Result<i64, AppError> {
        match (self.repo.balance(account).await?, account) {
            (Some(b), _) => Ok(b),
            (None, Account::Relationship { .. }) => Ok(0),
            (None, Account::Learner(_)) => Err(missing(account)),
        }
    }
}

fn ensure_non_negative(amount: i64) -> Result<(), AppError> {
    if amount < 0 {
        return Err(AppError::BadRequest(format!(
            "ledger amounts must be non-negative, got {amount}"
        )));
    }
    Ok(())
}

fn missing(account: &Account) -> AppError {
    AppError::not_found("learner", account.learner_id())
}
