/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Energy estimation for a finished execution.
//!
//! # Paths
//! * **Integrated**: executions lasting at least
//!   `short_workload_threshold_secs` are measured directly.  Source transmit
//!   power, destination receive power and destination bitrates are fetched
//!   over `[start − settle_in, end + settle_out]` and integrated with the
//!   trapezoidal rule.
//! * **Historical match**: shorter executions do not produce enough power
//!   samples to integrate, so the estimator looks back `lookback_days` for
//!   moments when the destination received at a rate within
//!   `bandwidth_tolerance` of the requested one, averages the power drawn at
//!   those moments, and scales it by the execution duration.
//!
//! Telemetry failures never abort an estimate; they are logged and treated as
//! empty series, which degrades the result to zero energy.

pub mod integrate;

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::config::EstimatorSettings;
use crate::telemetry::{Sample, TelemetryField, TelemetrySource, TimeBound};
use crate::workload::{EnergyPrediction, EstimationMethod, ExecutionResult};

/// mW·s per Wh.
const MILLIWATT_SECONDS_PER_WH: f64 = 3_600_000.0;

pub struct EnergyEstimator {
    telemetry: Arc<dyn TelemetrySource>,
    settings: EstimatorSettings,
}

impl EnergyEstimator {
    pub fn new(telemetry: Arc<dyn TelemetrySource>, settings: EstimatorSettings) -> Self {
        Self {
            telemetry,
            settings,
        }
    }

    /// Turn a measured execution into an energy prediction.
    pub async fn estimate(&self, execution: ExecutionResult) -> EnergyPrediction {
        let threshold = self.settings.short_workload_threshold_secs as f64;
        let prediction = if execution.duration_s >= threshold {
            match self.integrated(&execution).await {
                Some((tx_wh, rx_wh, received_bytes)) => EnergyPrediction::new(
                    execution,
                    tx_wh,
                    rx_wh,
                    received_bytes,
                    EstimationMethod::Integrated,
                ),
                None => {
                    info!(
                        exec_id = %execution.execution_id,
                        "too few power samples to integrate, using historical match"
                    );
                    self.historical(execution).await
                }
            }
        } else {
            self.historical(execution).await
        };

        info!(
            exec_id = %prediction.execution.execution_id,
            method = ?prediction.method,
            tx_wh = prediction.total_tx_energy_wh,
            rx_wh = prediction.total_rx_energy_wh,
            received_bytes = prediction.received_bytes,
            work_per_energy = prediction.work_per_energy,
            "energy estimated"
        );
        prediction
    }

    // ── Integrated path ───────────────────────────────────────────────────────

    /// `(tx Wh, rx Wh, received bytes)`, or `None` when either power series
    /// has fewer than two samples.
    async fn integrated(&self, execution: &ExecutionResult) -> Option<(f64, f64, u64)> {
        let start = execution.start_time - secs(self.settings.settle_in_secs);
        let end = TimeBound::At(execution.end_time + secs(self.settings.settle_out_secs));
        let src = execution.source_node.as_str();
        let dst = execution.destination_node.as_str();

        let (tx_power, rx_power, rx_rate, tx_rate) = tokio::join!(
            self.fetch(src, TelemetryField::TxPower, start, end),
            self.fetch(dst, TelemetryField::RxPower, start, end),
            self.fetch(dst, TelemetryField::RxBitrate, start, end),
            self.fetch(dst, TelemetryField::TxBitrate, start, end),
        );

        if tx_power.len() < 2 || rx_power.len() < 2 {
            return None;
        }

        let tx_wh = integrate::trapezoid(&tx_power) / MILLIWATT_SECONDS_PER_WH;
        let rx_wh = integrate::trapezoid(&rx_power) / MILLIWATT_SECONDS_PER_WH;
        let received_bytes = megabit_seconds_to_bytes(integrate::trapezoid(&rx_rate));
        debug!(
            exec_id = %execution.execution_id,
            tx_samples = tx_power.len(),
            rx_samples = rx_power.len(),
            sent_bytes = megabit_seconds_to_bytes(integrate::trapezoid(&tx_rate)),
            received_bytes,
            "integrated telemetry window"
        );
        Some((tx_wh, rx_wh, received_bytes))
    }

    // ── Historical-match path ─────────────────────────────────────────────────

    async fn historical(&self, execution: ExecutionResult) -> EnergyPrediction {
        let received_bytes = (execution.data_amount_mb * 1_000_000.0) as u64;
        let unavailable = |execution: ExecutionResult| {
            EnergyPrediction::new(
                execution,
                0.0,
                0.0,
                received_bytes,
                EstimationMethod::Unavailable,
            )
        };

        if execution.duration_s <= 0.0 {
            return unavailable(execution);
        }

        let start = Utc::now() - Duration::days(i64::from(self.settings.lookback_days));
        let src = execution.source_node.as_str();
        let dst = execution.destination_node.as_str();
        let (tx_power, rx_power, rx_rate) = tokio::join!(
            self.fetch(src, TelemetryField::TxPower, start, TimeBound::Now),
            self.fetch(dst, TelemetryField::RxPower, start, TimeBound::Now),
            self.fetch(dst, TelemetryField::RxBitrate, start, TimeBound::Now),
        );

        let Some((avg_tx_mw, avg_rx_mw, matches)) = self.match_history(
            execution.requested_bandwidth_mbps,
            &tx_power,
            &rx_power,
            &rx_rate,
        ) else {
            info!(
                exec_id = %execution.execution_id,
                bandwidth_mbps = execution.requested_bandwidth_mbps,
                "no historical samples at this bitrate"
            );
            return unavailable(execution);
        };

        debug!(
            exec_id = %execution.execution_id,
            matches,
            avg_tx_mw,
            avg_rx_mw,
            "historical power matched"
        );
        let tx_wh = avg_tx_mw * execution.duration_s / MILLIWATT_SECONDS_PER_WH;
        let rx_wh = avg_rx_mw * execution.duration_s / MILLIWATT_SECONDS_PER_WH;
        EnergyPrediction::new(
            execution,
            tx_wh,
            rx_wh,
            received_bytes,
            EstimationMethod::HistoricalMatch,
        )
    }

    /// Average tx/rx power at the most recent rate samples close to
    /// `target_mbps`, with the number of matches used.
    fn match_history(
        &self,
        target_mbps: f64,
        tx_power: &[Sample],
        rx_power: &[Sample],
        rx_rate: &[Sample],
    ) -> Option<(f64, f64, usize)> {
        let low = target_mbps * (1.0 - self.settings.bandwidth_tolerance);
        let high = target_mbps * (1.0 + self.settings.bandwidth_tolerance);
        let tolerance = self.settings.align_tolerance_secs as f64;

        let matched: Vec<(f64, f64)> = rx_rate
            .iter()
            .filter(|r| (low..=high).contains(&r.value))
            .filter_map(|r| {
                let tx = integrate::nearest(tx_power, r.timestamp, tolerance)?;
                let rx = integrate::nearest(rx_power, r.timestamp, tolerance)?;
                Some((tx.value, rx.value))
            })
            .collect();

        if matched.is_empty() {
            return None;
        }
        let recent = &matched[matched.len().saturating_sub(self.settings.max_samples)..];
        let n = recent.len() as f64;
        let avg_tx = recent.iter().map(|(tx, _)| tx).sum::<f64>() / n;
        let avg_rx = recent.iter().map(|(_, rx)| rx).sum::<f64>() / n;
        Some((avg_tx, avg_rx, recent.len()))
    }

    /// Query one series, degrading any failure to an empty series.
    async fn fetch(
        &self,
        node: &str,
        field: TelemetryField,
        start: DateTime<Utc>,
        end: TimeBound,
    ) -> Vec<Sample> {
        match self.telemetry.query(node, field, start, end).await {
            Ok(samples) => samples,
            Err(e) => {
                warn!(node, %field, "telemetry unavailable: {e}");
                Vec::new()
            }
        }
    }
}

fn secs(s: u64) -> Duration {
    Duration::seconds(i64::try_from(s).unwrap_or(i64::MAX / 1000))
}

/// ∫ Mbps dt → bytes.
fn megabit_seconds_to_bytes(megabit_seconds: f64) -> u64 {
    (megabit_seconds / 8.0 * 1_000_000.0).round().max(0.0) as u64
}

// ── Tests ─────────────────────────────────────────────────────────────────────
