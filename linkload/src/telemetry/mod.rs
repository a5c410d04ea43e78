/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Read access to the per-node power and bitrate time series.
//!
//! The estimator depends only on [`TelemetrySource`]; [`InfluxTelemetry`] is
//! the production implementation against an InfluxDB 1.x HTTP endpoint.

pub mod influx;

pub use influx::InfluxTelemetry;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// One timestamped reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

impl Sample {
    pub fn new(timestamp: DateTime<Utc>, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// Upper bound of a query window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeBound {
    At(DateTime<Utc>),
    /// Evaluated by the store at query time.
    Now,
}

/// Series published by every node's power monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TelemetryField {
    /// Transmit-side radio power, mW.
    TxPower,
    /// Receive-side radio power, mW.
    RxPower,
    /// Received bitrate, Mbps.
    RxBitrate,
    /// Transmitted bitrate, Mbps.
    TxBitrate,
}

impl TelemetryField {
    /// Field name in the store.
    pub fn as_str(self) -> &'static str {
        match self {
            TelemetryField::TxPower => "tx_mW",
            TelemetryField::RxPower => "rx_mW",
            TelemetryField::RxBitrate => "rx_bitrate_mbps",
            TelemetryField::TxBitrate => "tx_bitrate_mbps",
        }
    }
}

impl std::fmt::Display for TelemetryField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("telemetry URL is invalid: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("telemetry request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("telemetry store rejected the query (HTTP {status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("malformed telemetry response: {0}")]
    Malformed(String),
}

/// Time-series store holding node telemetry.
#[async_trait]
pub trait TelemetrySource: Send + Sync {
    /// Samples of `field` for `node` within `[start, end]`, ordered by
    /// timestamp.
    async fn query(
        &self,
        node: &str,
        field: TelemetryField,
        start: DateTime<Utc>,
        end: TimeBound,
    ) -> Result<Vec<Sample>, TelemetryError>;
}
