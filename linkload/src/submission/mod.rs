/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Delivery of finished predictions to external systems.
//!
//! Every configured [`SubmissionGateway`] receives every prediction.  A
//! failed delivery is logged by the pipeline and not retried.

pub mod cim;
pub mod influx;

pub use cim::CimGateway;
pub use influx::InfluxPredictionStore;

use async_trait::async_trait;
use thiserror::Error;

use crate::workload::EnergyPrediction;

#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error("invalid endpoint URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("submission rejected (HTTP {status}): {body}")]
    Rejected { status: u16, body: String },
}

/// A sink for [`EnergyPrediction`]s.
#[async_trait]
pub trait SubmissionGateway: Send + Sync {
    /// Short name used in log lines.
    fn name(&self) -> &'static str;

    async fn submit(&self, prediction: &EnergyPrediction) -> Result<(), SubmissionError>;
}
