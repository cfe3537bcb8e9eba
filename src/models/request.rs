use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The two participant roles inside a family. A requester asks for photos,
/// a fulfiller sends them. Also used as the origin role on a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Requester,
    Fulfiller,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Fulfilled,
}

/// A photo request. Created pending by a requester, or born already
/// fulfilled when a fulfiller sends photos unsolicited. The transition
/// pending -> fulfilled happens exactly once and never reverses;
/// `fulfilled_at`/`fulfilled_by_user_id` are set iff status is fulfilled.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoRequest {
    pub id: String,
    pub family_id: String,
    pub created_at: DateTime<Utc>,
    pub created_by_user_id: String,
    pub from_role: Role,
    pub status: RequestStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fulfilled_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fulfilled_by_user_id: Option<String>,
}

impl PhotoRequest {
    pub fn is_fulfilled(&self) -> bool {
        self.status == RequestStatus::Fulfilled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_serialize_lowercase() {
        assert_eq!(serde_json::to_value(Role::Requester).unwrap(), "requester");
        assert_eq!(serde_json::to_value(Role::Fulfiller).unwrap(), "fulfiller");
        assert_eq!(
            serde_json::to_value(RequestStatus::Pending).unwrap(),
            "pending"
        );
    }
}
