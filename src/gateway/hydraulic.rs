//! Hydraulic collaborator client
//!
//! Translates a target flow rate into a discrete gate level via the
//! hydraulic service. Callers fall back to the static flow table when the
//! service is down; this client never decides that fallback itself.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::defaults::HTTP_TIMEOUT_SECS;
use crate::config::EndpointConfig;
use crate::error::ControlError;
use crate::types::GateLevel;

#[derive(Debug, Serialize)]
struct GateLevelRequest<'a> {
    station_code: &'a str,
    target_flow_rate: f64,
}

#[derive(Debug, Deserialize)]
struct GateLevelResponse {
    gate_level: u8,
}

/// Client for `POST /hydraulic/gate-level`
#[derive(Clone)]
pub struct HydraulicClient {
    http: reqwest::Client,
    base_url: String,
    bearer_token: Option<String>,
}

impl HydraulicClient {
    pub fn new(endpoint: &EndpointConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: endpoint.base_url.trim_end_matches('/').to_string(),
            bearer_token: endpoint.api_key.clone(),
        }
    }

    /// Gate level for a target flow rate, clamped to an open position (2-4)
    pub async fn gate_level_for_flow(
        &self,
        station_code: &str,
        target_flow_rate_m3s: f64,
    ) -> Result<GateLevel, ControlError> {
        let mut request = self
            .http
            .post(format!("{}/hydraulic/gate-level", self.base_url))
            .json(&GateLevelRequest {
                station_code,
                target_flow_rate: target_flow_rate_m3s,
            });
        if let Some(token) = &self.bearer_token {
            request = request.header("Authorization", format!("Bearer {token}"));
        }

        let response = request
            .send()
            .await
            .map_err(|e| ControlError::HydraulicUnavailable(e.to_string()))?
            .error_for_status()
            .map_err(|e| ControlError::HydraulicUnavailable(e.to_string()))?;

        let body: GateLevelResponse = response
            .json()
            .await
            .map_err(|e| ControlError::HydraulicUnavailable(e.to_string()))?;

        Ok(GateLevel::clamp_open(body.gate_level))
    }
}
