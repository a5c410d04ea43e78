/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Core data structures flowing through the execution pipeline.
//!
//! ```text
//! HTTP  ──►  Workload  ──(enqueue)──►  QueuedExecution  ──(orchestrator)──►  ExecutionResult
//!                                                                                 │
//!                                          EnergyPrediction  ◄──(estimator)───────┘
//! ```
//!
//! # Ownership model
//! A [`QueuedExecution`] is owned by its link queue until the link worker
//! finishes it.  The orchestrator only borrows it; the [`ExecutionResult`] it
//! produces is **moved** into the estimator, which wraps it into the terminal
//! [`EnergyPrediction`] handed to the submission gateways.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::Link;
use crate::units::{self, Quantity, UnitError};

// ── Workload (request) ────────────────────────────────────────────────────────

/// A requested experiment, exactly as submitted by the operator.
#[derive(Debug, Clone, PartialEq)]
pub struct Workload {
    /// Node that receives the traffic (runs the iperf server).
    pub destination_node: String,
    /// iperf rate string, e.g. `"2.4M"`.
    pub bandwidth: String,
    /// Transfer size string, e.g. `"50M"`.
    pub data_amount: String,
    /// Earliest start.  `None` means "as soon as the link is free".
    pub start_time: Option<DateTime<Utc>>,
}

/// Parse an ISO-8601 start time.
///
/// Accepts RFC 3339 with an offset (`2025-03-01T10:00:00+02:00`, `…Z`) and
/// naive timestamps (`2025-03-01T10:00:00`), which are taken to be UTC.
pub fn parse_start_time(input: &str) -> Option<DateTime<Utc>> {
    let input = input.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(input, fmt).ok())
        .map(|naive| naive.and_utc())
}

// ── QueuedExecution ───────────────────────────────────────────────────────────

/// A [`Workload`] bound to its link, with its size and rate already parsed.
#[derive(Debug, Clone)]
pub struct QueuedExecution {
    pub execution_id: String,
    pub link: Link,
    pub workload: Workload,
    /// Requested start, or the enqueue instant when none was requested.
    pub start_at: DateTime<Utc>,
    pub enqueued_at: DateTime<Utc>,
    pub bandwidth_mbps: f64,
    pub data_bytes: u64,
}

impl QueuedExecution {
    /// Bind `workload` to `link`, parsing its rate and size strings.
    ///
    /// # Errors
    /// [`UnitError::InvalidFormat`] if either string is malformed or the
    /// bandwidth is not strictly positive.
    pub fn bind(
        workload: Workload,
        link: Link,
        now: DateTime<Utc>,
    ) -> Result<Self, UnitError> {
        let bandwidth_mbps = units::parse_bandwidth_to_mbps(&workload.bandwidth)?;
        if bandwidth_mbps <= 0.0 {
            return Err(UnitError::InvalidFormat {
                quantity: Quantity::Bandwidth,
                input: workload.bandwidth,
            });
        }
        let data_bytes = units::parse_size_to_bytes(&workload.data_amount)?;

        Ok(Self {
            execution_id: generate_execution_id(now),
            start_at: workload.start_time.unwrap_or(now),
            enqueued_at: now,
            link,
            workload,
            bandwidth_mbps,
            data_bytes,
        })
    }

    pub fn destination(&self) -> &str {
        &self.workload.destination_node
    }

    /// How long the worker must still wait before starting, or `None` if the
    /// start time has been reached.
    pub fn time_until_start(&self, now: DateTime<Utc>) -> Option<std::time::Duration> {
        (self.start_at - now).to_std().ok().filter(|d| !d.is_zero())
    }
}

/// `exec_<unix seconds>_<8 hex chars>`, sortable by submission second and
/// unique within it.
fn generate_execution_id(now: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("exec_{}_{}", now.timestamp(), &suffix[..8])
}

// ── ExecutionResult ───────────────────────────────────────────────────────────

/// Measured outcome of one iperf run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub execution_id: String,
    pub link: String,
    /// iperf client (traffic source).
    pub source_node: String,
    /// iperf server (traffic sink).
    pub destination_node: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_s: f64,
    /// Requested transfer size in MiB.
    pub data_amount_mb: f64,
    pub requested_bandwidth_mbps: f64,
    pub throughput_mbps: f64,
    pub jitter_ms: f64,
    pub lost_packets: u64,
    pub total_packets: u64,
    pub packet_loss_percent: f64,
}

// ── EnergyPrediction ──────────────────────────────────────────────────────────

/// Which estimator path produced the energy figures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimationMethod {
    /// Power and bitrate series integrated over the execution window.
    Integrated,
    /// Average power of historical periods at a similar bitrate.
    HistoricalMatch,
    /// No usable telemetry; energy figures are zero.
    Unavailable,
}

/// Terminal artifact of the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnergyPrediction {
    #[serde(flatten)]
    pub execution: ExecutionResult,
    pub total_tx_energy_wh: f64,
    pub total_rx_energy_wh: f64,
    pub total_energy_wh: f64,
    /// Bytes received at the destination.
    pub received_bytes: u64,
    /// `received_bytes` in decimal megabytes.
    pub data_transferred_mb: f64,
    /// Received bytes per watt-hour; `0.0` when no energy was measured.
    pub work_per_energy: f64,
    pub method: EstimationMethod,
}

impl EnergyPrediction {
    /// Assemble a prediction from the per-side energies (Wh) and received
    /// byte count, deriving the totals and the efficiency figure.
    pub fn new(
        execution: ExecutionResult,
        tx_wh: f64,
        rx_wh: f64,
        received_bytes: u64,
        method: EstimationMethod,
    ) -> Self {
        let total_energy_wh = tx_wh + rx_wh;
        Self {
            execution,
            total_tx_energy_wh: tx_wh,
            total_rx_energy_wh: rx_wh,
            total_energy_wh,
            received_bytes,
            data_transferred_mb: received_bytes as f64 / 1_000_000.0,
            work_per_energy: work_per_energy(received_bytes, total_energy_wh),
            method,
        }
    }
}

/// Bytes per watt-hour.  Returns `0.0` when `energy_wh` is not positive, so
/// an execution without telemetry still yields a well-defined figure.
pub fn work_per_energy(received_bytes: u64, energy_wh: f64) -> f64 {
    if energy_wh > 0.0 {
        received_bytes as f64 / energy_wh
    } else {
        0.0
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
