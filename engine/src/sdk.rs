//! Production implementations of the provider seams: a token source backed
//! by stored integrations and a reqwest SDK for activity detail fetches.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::Value;

use stride_ingress::{ProviderSdk, TokenSource};
use stride_store::MetadataStore;
use stride_types::ActivitySource;

/// Reads bearer tokens straight from the user's stored integration. Token
/// acquisition and refresh happen in the (out-of-process) auth flow; by the
/// time a token is stored here it is expected to be valid.
pub struct StoredTokenSource {
    store: Arc<dyn MetadataStore>,
}

impl StoredTokenSource {
    pub fn new(store: Arc<dyn MetadataStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl TokenSource for StoredTokenSource {
    async fn bearer_token(&self, user_id: &str, provider: &str) -> anyhow::Result<String> {
        let user = self
            .store
            .get_user(user_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("no user {user_id}"))?;
        let integration = user
            .integration(provider)
            .ok_or_else(|| anyhow::anyhow!("no enabled {provider} integration for {user_id}"))?;
        integration
            .access_token
            .clone()
            .ok_or_else(|| anyhow::anyhow!("no access token stored for {provider}"))
    }
}

/// Activity detail fetches against the real provider APIs.
pub struct HttpProviderSdk {
    client: reqwest::Client,
    tokens: Arc<dyn TokenSource>,
    strava_base: String,
    fitbit_base: String,
}

impl HttpProviderSdk {
    pub fn new(
        tokens: Arc<dyn TokenSource>,
        strava_base: impl Into<String>,
        fitbit_base: impl Into<String>,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(15))
                .build()?,
            tokens,
            strava_base: strava_base.into(),
            fitbit_base: fitbit_base.into(),
        })
    }
}

#[async_trait]
impl ProviderSdk for HttpProviderSdk {
    async fn fetch_activity(
        &self,
        user_id: &str,
        source: ActivitySource,
        external_id: &str,
    ) -> anyhow::Result<Value> {
        let token = self.tokens.bearer_token(user_id, source.as_str()).await?;
        let url = match source {
            ActivitySource::Strava => format!(
                "{}/api/v3/activities/{external_id}?include_all_efforts=false",
                self.strava_base
            ),
            _ => anyhow::bail!("{source} does not support fetch by id"),
        };
        let resp = self.client.get(&url).bearer_auth(&token).send().await?;
        if !resp.status().is_success() {
            anyhow::bail!("{source} detail fetch returned {}", resp.status());
        }
        Ok(resp.json().await?)
    }

    async fn fetch_activities_for_day(
        &self,
        user_id: &str,
        source: ActivitySource,
        date: NaiveDate,
    ) -> anyhow::Result<Vec<Value>> {
        let token = self.tokens.bearer_token(user_id, source.as_str()).await?;
        let url = match source {
            ActivitySource::Fitbit => format!(
                "{}/1/user/-/activities/list.json?afterDate={date}&sort=asc&limit=50&offset=0",
                self.fitbit_base
            ),
            _ => anyhow::bail!("{source} does not support fetch by day"),
        };
        let resp = self.client.get(&url).bearer_auth(&token).send().await?;
        if !resp.status().is_success() {
            anyhow::bail!("{source} day fetch returned {}", resp.status());
        }
        let json: Value = resp.json().await?;
        Ok(json
            .get("activities")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default())
    }
}
