//! Usage quota collaborator.

use common::QuotaConfig;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::model::AnalysisKind;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QuotaError {
    #[error("{user} has used {used} of {limit} analyses in the current window")]
    Exceeded { user: String, used: u32, limit: u32 },
}

#[async_trait::async_trait]
pub trait QuotaService: Send + Sync {
    /// Reserve one unit per requested type; nothing is reserved on rejection.
    async fn check_and_reserve(&self, user: Option<&str>, types: &[AnalysisKind]) -> Result<(), QuotaError>;
}

/// Accepts every request.
pub struct Unlimited;

#[async_trait::async_trait]
impl QuotaService for Unlimited {
    async fn check_and_reserve(&self, _user: Option<&str>, _types: &[AnalysisKind]) -> Result<(), QuotaError> {
        Ok(())
    }
}

struct Window {
    opened: Instant,
    used: u32,
}

/// Fixed-window counter per user, held in memory. Anonymous callers share
/// one bucket.
pub struct InMemoryQuota {
    limit: u32,
    window: Duration,
    usage: Mutex<HashMap<String, Window>>,
}

impl InMemoryQuota {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            usage: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &QuotaConfig) -> Self {
        Self::new(config.max_types_per_window, Duration::from_secs(config.window_seconds))
    }

    pub fn used(&self, user: &str) -> u32 {
        let usage = self.usage.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        usage.get(user).map(|w| w.used).unwrap_or(0)
    }
}

#[async_trait::async_trait]
impl QuotaService for InMemoryQuota {
    async fn check_and_reserve(&self, user: Option<&str>, types: &[AnalysisKind]) -> Result<(), QuotaError> {
        let user = user.unwrap_or("anonymous");
        let cost = types.len() as u32;
        let now = Instant::now();

        let mut usage = self.usage.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let window = usage.entry(user.to_string()).or_insert(Window { opened: now, used: 0 });
        if now.duration_since(window.opened) >= self.window {
            window.opened = now;
            window.used = 0;
        }
        if window.used.saturating_add(cost) > self.limit {
            return Err(QuotaError::Exceeded {
                user: user.to_string(),
                used: window.used,
                limit: self.limit,
            });
        }
        window.used += cost;
        Ok(())
    }
}

/// Quota service selected by `[quota]`.
pub fn from_config(config: &QuotaConfig) -> Box<dyn QuotaService> {
    if config.enabled {
        Box::new(InMemoryQuota::from_config(config))
    } else {
        Box::new(Unlimited)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use AnalysisKind::*;

    #[tokio::test]
    async fn rejects_without_reserving() {
        let quota = InMemoryQuota::new(3, Duration::from_secs(60));
        quota.check_and_reserve(Some("ana"), &[Bias, Jargon]).await.unwrap();
        let err = quota.check_and_reserve(Some("ana"), &[Bias, Jargon]).await.unwrap_err();
        assert_eq!(err, QuotaError::Exceeded { user: "ana".into(), used: 2, limit: 3 });
        assert_eq!(quota.used("ana"), 2);
        quota.check_and_reserve(Some("ana"), &[Pulse]).await.unwrap();
        assert_eq!(quota.used("ana"), 3);
        quota.check_and_reserve(Some("ben"), &[Pulse]).await.unwrap();
    }

    #[tokio::test]
    async fn window_resets() {
        let quota = InMemoryQuota::new(1, Duration::from_millis(20));
        quota.check_and_reserve(None, &[Bias]).await.unwrap();
        assert!(quota.check_and_reserve(None, &[Bias]).await.is_err());
        tokio::time::sleep(Duration::from_millis(30)).await;
        quota.check_and_reserve(None, &[Bias]).await.unwrap();
    }
}
