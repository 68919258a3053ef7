//! ML merchant-risk score client, spec.md §4.10 / §5.
//!
//! Grounded in the teacher's `scrapers::polymarket_api::PolymarketScraper`
//! HTTP client idiom (a bounded-timeout `reqwest::Client`, JSON in/out,
//! failures logged and absorbed rather than propagated). Here a failure or
//! timeout simply means "no override" — the rule-based score stands alone.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Request body: the model service expects every `WindowFeatures` field
/// (spec.md §6: "JSON body enumerating features (all WindowFeatures
/// fields)"), so we just forward the struct as-is.
#[derive(Debug, Serialize)]
struct ScoreRequest<'a> {
    #[serde(flatten)]
    features: &'a crate::models::WindowFeatures,
}

#[derive(Debug, Deserialize)]
struct ScoreResponse {
    #[serde(rename = "riskScore")]
    risk_score: f64,
}

pub struct ModelClient {
    client: Client,
    base_url: String,
}

impl ModelClient {
    pub fn new(base_url: String, timeout_ms: u64) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .expect("failed to build ML service HTTP client");
        Self { client, base_url }
    }

    /// Requests a MERCHANT-dimension score override. Any network error,
    /// non-2xx response, or timeout is logged and yields `None` — the
    /// caller falls back to the rule-based score.
    pub async fn score_merchant(&self, features: &crate::models::WindowFeatures) -> Option<f64> {
        let request = ScoreRequest { features };

        let response = match self.client.post(&self.base_url).json(&request).send().await {
            Ok(resp) => resp,
            Err(err) => {
                warn!(error = %err, "ml service call failed, falling back to rule-based score");
                return None;
            }
        };

        if !response.status().is_success() {
            warn!(status = %response.status(), "ml service returned non-success status");
            return None;
        }

        match response.json::<ScoreResponse>().await {
            Ok(body) if (0.0..=1.0).contains(&body.risk_score) => Some(body.risk_score),
            Ok(body) => {
                warn!(score = body.risk_score, "ml service returned out-of-range score");
                None
            }
            Err(err) => {
                warn!(error = %err, "ml service response was not valid");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_builds_with_bounded_timeout() {
        let _client = ModelClient::new("http://localhost:9999".to_string(), 500);
    }
}
