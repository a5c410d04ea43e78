/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Stores each prediction as one InfluxDB point so results can be graphed
//! next to the raw power series.

use std::fmt::Write as _;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tracing::info;
use url::Url;

use super::{SubmissionError, SubmissionGateway};
use crate::config::PredictionStoreSettings;
use crate::http::{endpoint, snippet};
use crate::workload::EnergyPrediction;

pub struct InfluxPredictionStore {
    http: reqwest::Client,
    write_url: Url,
    database: String,
    measurement: String,
    username: Option<String>,
    password: Option<SecretString>,
}

impl InfluxPredictionStore {
    pub fn new(settings: &PredictionStoreSettings) -> Result<Self, SubmissionError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            write_url: endpoint(&settings.url, "write")?,
            database: settings.database.clone(),
            measurement: settings.measurement.clone(),
            username: settings.username.clone(),
            password: settings.password.clone(),
        })
    }

    /// Line-protocol record, timestamped at the execution start (ms precision).
    fn line(&self, p: &EnergyPrediction) -> String {
        let e = &p.execution;
        let mut line = escape_key(&self.measurement);
        for (key, value) in [
            ("exec_unit_id", &e.execution_id),
            ("src_node", &e.source_node),
            ("dst_node", &e.destination_node),
        ] {
            let _ = write!(line, ",{key}={}", escape_key(value));
        }

        let fields = [
            ("duration_s", e.duration_s),
            ("data_amount_mb", e.data_amount_mb),
            ("bandwidth_req_mbps", e.requested_bandwidth_mbps),
            ("throughput_mbps", e.throughput_mbps),
            ("jitter_ms", e.jitter_ms),
            ("packet_loss_percent", e.packet_loss_percent),
            ("total_tx_Wh", p.total_tx_energy_wh),
            ("total_rx_Wh", p.total_rx_energy_wh),
            ("total_energy_Wh", p.total_energy_wh),
            ("MB", p.data_transferred_mb),
            ("work_bytes_per_wh", p.work_per_energy),
        ];
        let mut separator = ' ';
        for (key, value) in fields.iter().filter(|(_, v)| v.is_finite()) {
            let _ = write!(line, "{separator}{key}={value:?}");
            separator = ',';
        }

        let _ = write!(line, " {}", e.start_time.timestamp_millis());
        line
    }
}

/// Escape a measurement name, tag key or tag value.
fn escape_key(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, ',' | '=' | ' ') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[async_trait]
impl SubmissionGateway for InfluxPredictionStore {
    fn name(&self) -> &'static str {
        "influx"
    }

    async fn submit(&self, prediction: &EnergyPrediction) -> Result<(), SubmissionError> {
        let mut params = vec![("db", self.database.as_str()), ("precision", "ms")];
        if let Some(user) = &self.username {
            params.push(("u", user.as_str()));
        }
        if let Some(password) = &self.password {
            params.push(("p", password.expose_secret()));
        }

        let resp = self
            .http
            .post(self.write_url.clone())
            .query(&params)
            .body(self.line(prediction))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SubmissionError::Rejected {
                status: status.as_u16(),
                body: snippet(&body),
            });
        }
        info!(
            exec_id = %prediction.execution.execution_id,
            measurement = %self.measurement,
            "prediction stored"
        );
        Ok(())
    }
}
