use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionTier {
    #[default]
    Free,
    Premium,
}

impl SubscriptionTier {
    /// Exempt accounts are never touched by the expiration pipeline.
    pub fn is_exempt(self) -> bool {
        self == SubscriptionTier::Premium
    }
}

/// The sharing group that owns requests and photos.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Family {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub created_by_user_id: String,
    pub pairing_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pairing_expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub subscription_tier: SubscriptionTier,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_premium_is_exempt() {
        assert!(!SubscriptionTier::Free.is_exempt());
        assert!(SubscriptionTier::Premium.is_exempt());
    }

    #[test]
    fn tier_defaults_to_free_when_missing() {
        let json = serde_json::json!({
            "id": "f1",
            "createdAt": "2025-01-01T00:00:00Z",
            "createdByUserId": "u1",
            "pairingCode": "abc"
        });
        let family: Family = serde_json::from_value(json).unwrap();
        assert_eq!(family.subscription_tier, SubscriptionTier::Free);
    }
}
