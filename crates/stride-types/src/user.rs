use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Billing tier. Controls the monthly sync allowance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    #[default]
    Hobbyist,
    Athlete,
}

/// Per-provider credentials and linkage. A sub-record exists only once the
/// user has actually connected the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Integration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_id: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    /// Keyed by provider id (`strava`, `fitbit`, `hevy`, ...). Sources and
    /// destinations share this map.
    #[serde(default)]
    pub integrations: HashMap<String, Integration>,
    #[serde(default)]
    pub push_tokens: Vec<String>,
    #[serde(default)]
    pub tier: Tier,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default = "default_true")]
    pub access_enabled: bool,
    #[serde(default)]
    pub monthly_sync_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_count_reset_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub prevented_sync_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub billing_customer_id: Option<String>,
}

impl UserRecord {
    pub fn new(user_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            created_at: now,
            integrations: HashMap::new(),
            push_tokens: Vec::new(),
            tier: Tier::default(),
            is_admin: false,
            access_enabled: true,
            monthly_sync_count: 0,
            sync_count_reset_at: None,
            prevented_sync_count: 0,
            billing_customer_id: None,
        }
    }

    pub fn integration(&self, provider: &str) -> Option<&Integration> {
        self.integrations.get(provider).filter(|i| i.enabled)
    }
}
