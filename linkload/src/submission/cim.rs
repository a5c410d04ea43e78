/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Client for the CIM network-metrics API.
//!
//! Authentication is a credential exchange: `{email, password}` is posted to
//! the token endpoint (as JSON or as a form, with configurable field names)
//! and the returned token is sent as `Authorization: <type> <token>` on the
//! submit call.  Every submission performs its own exchange.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tracing::{debug, info};
use url::Url;

use super::{SubmissionError, SubmissionGateway};
use crate::config::{AuthBodyMode, CimSettings};
use crate::http::{endpoint, snippet};
use crate::workload::EnergyPrediction;

/// Keys tried, in order, after the configured token field.
const TOKEN_FIELD_FALLBACKS: [&str; 4] = ["access_token", "token", "jwt", "id_token"];

const MEASUREMENT_TYPE: &str = "energy consumption estimation";

// ── Payload ───────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct Facts<'a> {
    site: &'a str,
    #[serde(rename = "Energy_wh")]
    energy_wh: f64,
    work: f64,
    start_exec_time: String,
    stop_exec_time: String,
    status: &'static str,
    owner: &'a str,
    #[serde(rename = "ExecUnitID")]
    exec_unit_id: &'a str,
    exec_unit_finished: u8,
    #[serde(rename = "detail_network")]
    detail_network: NetworkDetail<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct NetworkDetail<'a> {
    amount_of_data_transferred: u64,
    network_type: &'a str,
    measurement_type: &'static str,
    #[serde(rename = "DestinationExecUnitID")]
    destination_exec_unit_id: &'a str,
}

fn timestamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

// ── Token handling ────────────────────────────────────────────────────────────

#[derive(Debug)]
struct Token {
    value: String,
    kind: String,
}

/// Pull the token and its type out of an auth response body.
///
/// Non-JSON bodies are taken as the raw token.
fn extract_token(body: &str, token_field: &str, default_type: &str) -> Option<(String, String)> {
    let Ok(json) = serde_json::from_str::<serde_json::Value>(body) else {
        let raw = body.trim();
        return (!raw.is_empty()).then(|| (raw.to_string(), default_type.to_string()));
    };

    let lookup = |key: &str| {
        json.get(key)
            .and_then(serde_json::Value::as_str)
            .filter(|s| !s.is_empty())
    };
    let value = std::iter::once(token_field)
        .chain(TOKEN_FIELD_FALLBACKS)
        .find_map(lookup)?;
    let kind = lookup("token_type")
        .or_else(|| lookup("type"))
        .unwrap_or(default_type);
    Some((value.to_string(), kind.to_string()))
}

// ── Gateway ───────────────────────────────────────────────────────────────────

/// [`SubmissionGateway`] posting CIM facts with a `detail_network` record.
pub struct CimGateway {
    http: reqwest::Client,
    auth_url: Url,
    submit_url: Url,
    settings: CimSettings,
    password: SecretString,
}

impl CimGateway {
    /// # Errors
    /// [`SubmissionError::Authentication`] if no password was provided, or a
    /// URL/client construction error.
    pub fn new(settings: &CimSettings) -> Result<Self, SubmissionError> {
        let password = settings.password.clone().ok_or_else(|| {
            SubmissionError::Authentication("no CIM password configured".to_string())
        })?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .danger_accept_invalid_certs(!settings.verify_tls)
            .build()?;
        Ok(Self {
            http,
            auth_url: endpoint(&settings.base_url, &settings.auth_path)?,
            submit_url: endpoint(&settings.base_url, &settings.submit_path)?,
            settings: settings.clone(),
            password,
        })
    }

    async fn fetch_token(&self) -> Result<Token, SubmissionError> {
        debug!(url = %self.auth_url, mode = ?self.settings.auth_body, "requesting CIM token");

        let mut credentials = HashMap::new();
        credentials.insert(self.settings.email_field.as_str(), self.settings.email.as_str());
        credentials.insert(
            self.settings.password_field.as_str(),
            self.password.expose_secret(),
        );

        let request = self.http.post(self.auth_url.clone());
        let request = match self.settings.auth_body {
            AuthBodyMode::Json => request.json(&credentials),
            AuthBodyMode::Form => request.form(&credentials),
        };
        let resp = request.send().await?;

        let status = resp.status();
        let body = resp.text().await?;
        if status.as_u16() >= 400 {
            return Err(SubmissionError::Authentication(format!(
                "HTTP {status} from {}: {}",
                self.auth_url,
                snippet(&body)
            )));
        }

        let (value, kind) =
            extract_token(&body, &self.settings.token_field, &self.settings.token_type)
                .ok_or_else(|| {
                    SubmissionError::Authentication(format!(
                        "no token in response (checked '{}' and {:?})",
                        self.settings.token_field, TOKEN_FIELD_FALLBACKS
                    ))
                })?;
        Ok(Token { value, kind })
    }

    fn facts<'a>(&'a self, p: &'a EnergyPrediction) -> Facts<'a> {
        let exec_id = p.execution.execution_id.as_str();
        Facts {
            site: &self.settings.site,
            energy_wh: p.total_energy_wh,
            work: p.work_per_energy,
            start_exec_time: timestamp(p.execution.start_time),
            stop_exec_time: timestamp(p.execution.end_time),
            status: "done",
            owner: &self.settings.owner,
            exec_unit_id: exec_id,
            exec_unit_finished: 1,
            detail_network: NetworkDetail {
                amount_of_data_transferred: p.received_bytes,
                network_type: &self.settings.network_type,
                measurement_type: MEASUREMENT_TYPE,
                destination_exec_unit_id: exec_id,
            },
        }
    }
}

#[async_trait]
impl SubmissionGateway for CimGateway {
    fn name(&self) -> &'static str {
        "cim"
    }

    async fn submit(&self, prediction: &EnergyPrediction) -> Result<(), SubmissionError> {
        let token = self.fetch_token().await?;
        let resp = self
            .http
            .post(self.submit_url.clone())
            .header(
                reqwest::header::AUTHORIZATION,
                format!("{} {}", token.kind, token.value),
            )
            .json(&self.facts(prediction))
            .send()
            .await?;

        let status = resp.status();
        if status.as_u16() >= 300 {
            let body = resp.text().await.unwrap_or_default();
            return Err(SubmissionError::Rejected {
                status: status.as_u16(),
                body: snippet(&body),
            });
        }
        info!(exec_id = %prediction.execution.execution_id, "prediction submitted to CIM");
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
