//! Layered cancellation: any number of tokens plus an optional deadline.

use crate::utils::errors::{BackupError, Result};
use futures_util::future::select_all;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Cancellation context for one operation.
///
/// A scope is cancelled as soon as any of its tokens fires or its deadline
/// passes. Scopes only grow: children add tokens or tighten the deadline,
/// and never affect the scope they were derived from.
#[derive(Debug, Clone, Default)]
pub struct CancelScope {
    tokens: Vec<CancellationToken>,
    deadline: Option<Instant>,
}

impl CancelScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_token(token: CancellationToken) -> Self {
        Self::new().with_token(token)
    }

    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.tokens.push(token);
        self
    }

    /// Add a deadline `timeout` from now, keeping an earlier one if present.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        self.tokens.iter().any(CancellationToken::is_cancelled)
            || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// `Err(Canceled)` once the scope is cancelled.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(BackupError::Canceled)
        } else {
            Ok(())
        }
    }

    /// Resolves when the scope is cancelled.
    pub async fn cancelled(&self) {
        let tokens = async {
            if self.tokens.is_empty() {
                std::future::pending::<()>().await;
            } else {
                select_all(self.tokens.iter().map(|t| Box::pin(t.cancelled()))).await;
            }
        };

        let deadline = async {
            match self.deadline {
                Some(deadline) => {
                    tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await
                }
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = tokens => {}
            _ = deadline => {}
        }
    }
}
