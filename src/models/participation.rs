//! Participation model linking a user to a mission.

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Id prefix of participations that exist only in the client cache.
pub const PLACEHOLDER_ID_PREFIX: &str = "temp-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipationStatus {
    Confirmed,
    Cancelled,
}

impl ParticipationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipationStatus::Confirmed => "confirmed",
            ParticipationStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "confirmed" => Some(ParticipationStatus::Confirmed),
            "cancelled" => Some(ParticipationStatus::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participation {
    pub id: String,
    pub user_id: String,
    pub mission_id: String,
    pub status: ParticipationStatus,
    pub joined_at: String,
}

impl Participation {
    /// A confirmed participation standing in for one the server has not created yet.
    pub fn placeholder(user_id: &str, mission_id: &str) -> Self {
        Self {
            id: format!("{}{}", PLACEHOLDER_ID_PREFIX, uuid::Uuid::new_v4()),
            user_id: user_id.to_string(),
            mission_id: mission_id.to_string(),
            status: ParticipationStatus::Confirmed,
            joined_at: Utc::now().to_rfc3339(),
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.id.starts_with(PLACEHOLDER_ID_PREFIX)
    }

    pub fn is_confirmed(&self) -> bool {
        self.status == ParticipationStatus::Confirmed
    }

    pub fn is_active_for(&self, user_id: &str, mission_id: &str) -> bool {
        self.is_confirmed() && self.user_id == user_id && self.mission_id == mission_id
    }
}

/// Request body for creating a participation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateParticipationRequest {
    pub user_id: String,
    pub mission_id: String,
}

/// Compound filter for listing participations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipationQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mission_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ParticipationStatus>,
}

impl ParticipationQuery {
    /// Confirmed participations of one user.
    pub fn confirmed_for(user_id: &str) -> Self {
        Self {
            user_id: Some(user_id.to_string()),
            mission_id: None,
            status: Some(ParticipationStatus::Confirmed),
        }
    }

    /// Confirmed participation of one user in one mission.
    pub fn active(user_id: &str, mission_id: &str) -> Self {
        Self {
            user_id: Some(user_id.to_string()),
            mission_id: Some(mission_id.to_string()),
            status: Some(ParticipationStatus::Confirmed),
        }
    }

    pub fn matches(&self, participation: &Participation) -> bool {
        self.user_id
            .as_deref()
            .map_or(true, |u| u == participation.user_id)
            && self
                .mission_id
                .as_deref()
                .map_or(true, |m| m == participation.mission_id)
            && self.status.map_or(true, |s| s == participation.status)
    }
}

/// Result of deleting a participation. Deleting a missing one is not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteOutcome {
    pub deleted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_is_confirmed_and_marked() {
        let p = Participation::placeholder("u1", "m1");
        assert!(p.is_placeholder());
        assert!(p.is_active_for("u1", "m1"));
        assert!(!p.is_active_for("u2", "m1"));
    }

    #[test]
    fn test_query_matches_compound_filter() {
        let p = Participation {
            id: "p1".to_string(),
            user_id: "u1".to_string(),
            mission_id: "m1".to_string(),
            status: ParticipationStatus::Cancelled,
            joined_at: "2025-01-01T00:00:00Z".to_string(),
        };
        assert!(ParticipationQuery::default().matches(&p));
        assert!(!ParticipationQuery::confirmed_for("u1").matches(&p));
        assert!(!ParticipationQuery::active("u1", "m1").matches(&p));

        let query = ParticipationQuery {
            mission_id: Some("m1".to_string()),
            ..Default::default()
        };
        assert!(query.matches(&p));
    }

    #[test]
    fn test_query_serializes_only_present_fields() {
        let encoded = serde_json::to_value(ParticipationQuery::confirmed_for("u7")).unwrap();
        assert_eq!(
            encoded,
            serde_json::json!({ "userId": "u7", "status": "confirmed" })
        );
    }
}
