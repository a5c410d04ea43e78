/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! linkload – per-link wireless workload scheduler and energy estimator
//!
//! Module layout:
//!
//! ```text
//! lib.rs
//! ├── config/        – YAML topology + service settings
//! ├── units          – size / bandwidth string parsing
//! ├── http           – URL joining and body snippets for outbound clients
//! ├── workload       – request, queued execution, result and prediction types
//! ├── remote/        – command execution on nodes (ssh)
//! ├── orchestrator/  – two-sided iperf run with guaranteed server teardown
//! ├── telemetry/     – power / bitrate time series (InfluxDB)
//! ├── estimator/     – energy integration and historical matching
//! ├── submission/    – CIM metrics API and InfluxDB prediction store
//! ├── scheduler/     – one FIFO queue and worker per link
//! └── server/        – HTTP control surface
//! ```

pub mod config;
pub mod estimator;
mod http;
pub mod orchestrator;
pub mod remote;
pub mod scheduler;
pub mod server;
pub mod submission;
pub mod telemetry;
pub mod units;
pub mod workload;
