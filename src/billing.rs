//! HTTP client for the billing backend.
//!
//! The client only knows two things: which plan the user is on, and how to
//! open a checkout session for an upgrade. Payment state machines, webhooks
//! and invoicing are entirely server-side.

use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::models::enums::PlanTier;

const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Request body for the checkout endpoint.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CheckoutRequest<'a> {
    plan: PlanTier,
    price_id: &'a str,
}

/// A ready-to-open checkout session.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutSession {
    pub url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlanResponse {
    plan: PlanTier,
}

pub struct BillingClient {
    base_url: String,
    client: reqwest::Client,
}

impl BillingClient {
    pub fn new(base_url: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    /// The user's current plan tier. Callers cache this behind a
    /// `PrefsCache` and invalidate it after checkout.
    pub async fn current_plan(&self, user_id: &str) -> Result<PlanTier, SyncError> {
        let url = format!("{}/api/billing/plan/{user_id}", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| SyncError::Transient(format!("billing request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::Transient(format!("billing returned {status}")));
        }

        response
            .json::<PlanResponse>()
            .await
            .map(|r| r.plan)
            .map_err(|e| SyncError::Transient(format!("billing response malformed: {e}")))
    }

    /// Start a checkout session for upgrading to `plan`.
    pub async fn create_checkout(
        &self,
        plan: PlanTier,
        price_id: &str,
    ) -> Result<CheckoutSession, SyncError> {
        if price_id.is_empty() {
            return Err(SyncError::Validation("priceId must not be empty".into()));
        }

        let url = format!("{}/api/billing/checkout", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&CheckoutRequest { plan, price_id })
            .send()
            .await
            .map_err(|e| SyncError::Transient(format!("billing request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::Transient(format!(
                "billing returned {status}: {body}"
            )));
        }

        response
            .json::<CheckoutSession>()
            .await
            .map_err(|e| SyncError::Transient(format!("billing response malformed: {e}")))
    }
}
