use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Days a photo survives on the free tier before it is eligible for trashing.
pub const TTL_DAYS: i64 = 30;

/// Days a trashed photo stays recoverable before the purge job claims it.
pub const RECOVERY_DAYS: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhotoStatus {
    Active,
    Trashed,
}

/// A single shared photo. Belongs to exactly one request (and transitively
/// one family). The lifecycle fields (`status`, `trashed_at`, `purge_at`)
/// are authoritative; everything time-derived is computed against a caller
/// supplied `now` so jobs and tests stay deterministic.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Photo {
    pub id: String,
    pub request_id: String,
    pub family_id: String,
    pub created_at: DateTime<Utc>,
    pub created_by_user_id: String,
    pub blob_path: String,
    #[serde(default)]
    pub is_blocked: bool,
    pub status: PhotoStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trashed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purge_at: Option<DateTime<Utc>>,
}

impl Photo {
    /// Explicit override if set, otherwise created_at + 30 days.
    pub fn effective_expires_at(&self) -> DateTime<Utc> {
        self.expires_at
            .unwrap_or(self.created_at + Duration::days(TTL_DAYS))
    }

    pub fn is_trashed(&self) -> bool {
        self.status == PhotoStatus::Trashed
    }

    /// Trashed photos are always expired so they disappear from normal views.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.is_trashed() || now >= self.effective_expires_at()
    }

    /// Still inside the recovery window: trashed, with a purge deadline that
    /// has not passed yet.
    pub fn is_recoverable(&self, now: DateTime<Utc>) -> bool {
        self.is_trashed() && self.purge_at.is_some_and(|p| now < p)
    }

    /// Whole days until expiry, floored at 0. Trashed photos report 0.
    pub fn days_until_expiry(&self, now: DateTime<Utc>) -> i64 {
        if self.is_trashed() {
            return 0;
        }
        (self.effective_expires_at() - now).num_days().max(0)
    }

    /// Whole days until the purge deadline; `None` unless trashed with a
    /// deadline set.
    pub fn days_until_purge(&self, now: DateTime<Utc>) -> Option<i64> {
        if !self.is_trashed() {
            return None;
        }
        self.purge_at.map(|p| (p - now).num_days().max(0))
    }
}
