/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! InfluxDB 1.x `/query` client.
//!
//! Power monitors publish over MQTT; the broker bridge writes every message
//! into one measurement tagged with `topic = "power/<node>"`.  A query selects
//! a single field for a single topic and asks for epoch-millisecond
//! timestamps so no date parsing is needed on the way back.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, trace};
use url::Url;

use super::{Sample, TelemetryError, TelemetryField, TelemetrySource, TimeBound};
use crate::config::TelemetrySettings;
use crate::http::{endpoint, snippet};

/// [`TelemetrySource`] backed by InfluxQL over HTTP.
pub struct InfluxTelemetry {
    http: reqwest::Client,
    query_url: Url,
    database: String,
    measurement: String,
    topic_prefix: String,
    username: Option<String>,
    password: Option<SecretString>,
}

impl InfluxTelemetry {
    pub fn new(settings: &TelemetrySettings) -> Result<Self, TelemetryError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            query_url: endpoint(&settings.url, "query")?,
            database: settings.database.clone(),
            measurement: settings.measurement.clone(),
            topic_prefix: settings.topic_prefix.clone(),
            username: settings.username.clone(),
            password: settings.password.clone(),
        })
    }

    /// InfluxQL for one field of one node.
    fn build_query(
        &self,
        node: &str,
        field: TelemetryField,
        start: DateTime<Utc>,
        end: TimeBound,
    ) -> String {
        let end = match end {
            TimeBound::At(t) => format!("'{}'", rfc3339(t)),
            TimeBound::Now => "now()".to_string(),
        };
        format!(
            "SELECT \"{field}\" FROM \"{measurement}\" WHERE \"topic\" = '{topic}' \
             AND time >= '{start}' AND time <= {end} ORDER BY time ASC",
            field = field.as_str(),
            measurement = escape_identifier(&self.measurement),
            topic = escape_literal(&format!("{}{}", self.topic_prefix, node)),
            start = rfc3339(start),
        )
    }
}

fn rfc3339(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn escape_identifier(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

fn escape_literal(s: &str) -> String {
    s.replace('\\', "\\\\").replace('\'', "\\'")
}

// ── Response shape ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    results: Vec<StatementResult>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatementResult {
    #[serde(default)]
    series: Vec<Series>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Series {
    columns: Vec<String>,
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

/// Flatten every series into samples.  `null` values read as `0.0`.
fn into_samples(
    response: QueryResponse,
    field: TelemetryField,
) -> Result<Vec<Sample>, TelemetryError> {
    if let Some(e) = response.error {
        return Err(TelemetryError::Malformed(e));
    }

    let mut samples = Vec::new();
    for statement in response.results {
        if let Some(e) = statement.error {
            return Err(TelemetryError::Malformed(e));
        }
        for series in statement.series {
            let column = |name: &str| {
                series
                    .columns
                    .iter()
                    .position(|c| c == name)
                    .ok_or_else(|| TelemetryError::Malformed(format!("missing column '{name}'")))
            };
            let time_idx = column("time")?;
            let value_idx = column(field.as_str())?;

            for row in &series.values {
                let millis = row
                    .get(time_idx)
                    .and_then(serde_json::Value::as_i64)
                    .ok_or_else(|| TelemetryError::Malformed(format!("bad time in row {row:?}")))?;
                let timestamp = DateTime::from_timestamp_millis(millis).ok_or_else(|| {
                    TelemetryError::Malformed(format!("timestamp out of range: {millis}"))
                })?;
                let value = row
                    .get(value_idx)
                    .and_then(serde_json::Value::as_f64)
                    .unwrap_or(0.0);
                samples.push(Sample::new(timestamp, value));
            }
        }
    }

    samples.sort_by_key(|s| s.timestamp);
    Ok(samples)
}

#[async_trait]
impl TelemetrySource for InfluxTelemetry {
    async fn query(
        &self,
        node: &str,
        field: TelemetryField,
        start: DateTime<Utc>,
        end: TimeBound,
    ) -> Result<Vec<Sample>, TelemetryError> {
        let q = self.build_query(node, field, start, end);
        debug!(node, %field, "telemetry query");
        trace!(query = %q);

        let mut params = vec![
            ("db", self.database.as_str()),
            ("q", q.as_str()),
            ("epoch", "ms"),
        ];
        if let Some(user) = &self.username {
            params.push(("u", user.as_str()));
        }
        if let Some(password) = &self.password {
            params.push(("p", password.expose_secret()));
        }

        let resp = self
            .http
            .get(self.query_url.clone())
            .query(&params)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(TelemetryError::Rejected {
                status: status.as_u16(),
                body: snippet(&body),
            });
        }

        let response: QueryResponse = resp.json().await?;
        let samples = into_samples(response, field)?;
        debug!(node, %field, count = samples.len(), "telemetry samples received");
        Ok(samples)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
