/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Remote execution of one iperf transfer across a link.
//!
//! # Steps
//! ```text
//! resolve roles ─► discover addresses ─► check association ─► clean stale iperf
//!       ─► start server ─► run client ─► stop server ─► parse report
//! ```
//! The destination runs the server and the other link member runs the client.
//! Once the server has printed its pid, a [`ServerGuard`] owns it: the guard is
//! stopped explicitly after the client returns, and if the execution future is
//! dropped first the guard's `Drop` spawns the kill instead.  The client runs
//! in its own task, so a panic there surfaces as
//! [`ExecutionError::ClientAborted`] after the server has been stopped.
//!
//! The start timestamp is taken before address discovery and the end timestamp
//! after the server is stopped, so the reported window covers everything the
//! radios did for this execution.

pub mod error;
pub mod iperf;

pub use error::ExecutionError;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::task::AbortOnDropHandle;
use tracing::{debug, info, warn};

use crate::config::{NodeEndpoint, Topology};
use crate::remote::{CommandOutput, NodeController};
use crate::units;
use crate::workload::{ExecutionResult, QueuedExecution};

/// Drives the iperf state machine over a [`NodeController`].
pub struct Orchestrator {
    controller: Arc<dyn NodeController>,
    topology: Arc<Topology>,
    command_timeout: Duration,
}

impl Orchestrator {
    pub fn new(
        controller: Arc<dyn NodeController>,
        topology: Arc<Topology>,
        command_timeout: Duration,
    ) -> Self {
        Self {
            controller,
            topology,
            command_timeout,
        }
    }

    /// Run `execution` to completion and report what iperf measured.
    ///
    /// # Errors
    /// Any step failure as an [`ExecutionError`].  The server process is
    /// stopped before this returns whenever it was started.
    pub async fn execute(
        &self,
        execution: &QueuedExecution,
    ) -> Result<ExecutionResult, ExecutionError> {
        let link = &execution.link;
        let destination = execution.destination();

        // ── Step 1: roles ────────────────────────────────────────────────────
        let source = link
            .peer_of(destination)
            .ok_or_else(|| ExecutionError::RoleResolution {
                node: destination.to_string(),
                link: link.name.clone(),
            })?;
        let server = self.endpoint(destination)?;
        let client = self.endpoint(source)?;
        let station = self.endpoint(&link.station)?;

        info!(
            exec_id = %execution.execution_id,
            link = %link.name,
            client = %client.name,
            server = %server.name,
            bandwidth_mbps = execution.bandwidth_mbps,
            data_bytes = execution.data_bytes,
            "execution started"
        );
        let start_time = Utc::now();

        // ── Step 2: addresses ────────────────────────────────────────────────
        let server_ip = self.wireless_address(server).await?;
        let client_ip = self.wireless_address(client).await?;
        debug!(%server_ip, %client_ip, "addresses resolved");

        // ── Step 3: association ──────────────────────────────────────────────
        let status = self
            .run(station, &iperf::link_status_command(&station.interface))
            .await?;
        let diagnostic = format!("{}{}", status.stdout, status.stderr);
        if !iperf::is_associated(&diagnostic) {
            return Err(ExecutionError::LinkNotAssociated {
                node: station.name.clone(),
                diagnostic: diagnostic.trim().to_string(),
            });
        }

        // ── Step 4: stale processes ──────────────────────────────────────────
        for node in [server, client] {
            self.clean_stale(node).await?;
        }

        // ── Step 5: server ───────────────────────────────────────────────────
        let launch = self.run(server, iperf::START_SERVER).await?;
        let pid = iperf::parse_pid(&launch.stdout).ok_or_else(|| {
            ExecutionError::ServerStartFailed {
                node: server.name.clone(),
                output: launch.stdout.trim().to_string(),
            }
        })?;
        debug!(node = %server.name, pid, "iperf server started");
        let guard = ServerGuard::new(
            Arc::clone(&self.controller),
            server.clone(),
            pid,
            self.command_timeout,
        );

        // ── Step 6: client ───────────────────────────────────────────────────
        let client_timeout = self.client_timeout(execution);
        let command = iperf::client_command(
            &server_ip,
            execution.bandwidth_mbps,
            execution.data_bytes,
        );
        let client_run = AbortOnDropHandle::new(tokio::spawn({
            let controller = Arc::clone(&self.controller);
            let client = client.clone();
            async move { controller.run(&client, &command, client_timeout).await }
        }));
        let client_out = client_run.await;

        // ── Step 7: teardown ─────────────────────────────────────────────────
        guard.stop().await;
        let end_time = Utc::now();
        let client_out = client_out.map_err(|e| ExecutionError::ClientAborted {
            node: client.name.clone(),
            reason: e.to_string(),
        })??;

        // ── Step 8: report ───────────────────────────────────────────────────
        let report = iperf::parse_report(&client_out.stdout).ok_or_else(|| {
            ExecutionError::UnparsableOutput {
                output: format!("{}{}", client_out.stdout, client_out.stderr)
                    .trim()
                    .to_string(),
            }
        })?;

        let duration_s = (end_time - start_time).num_milliseconds() as f64 / 1000.0;
        info!(
            exec_id = %execution.execution_id,
            duration_s,
            throughput_mbps = report.throughput_mbps,
            jitter_ms = report.jitter_ms,
            loss_percent = report.loss_percent,
            "execution finished"
        );

        Ok(ExecutionResult {
            execution_id: execution.execution_id.clone(),
            link: link.name.clone(),
            source_node: client.name.clone(),
            destination_node: server.name.clone(),
            start_time,
            end_time,
            duration_s,
            data_amount_mb: units::bytes_to_mib(execution.data_bytes),
            requested_bandwidth_mbps: execution.bandwidth_mbps,
            throughput_mbps: report.throughput_mbps,
            jitter_ms: report.jitter_ms,
            lost_packets: report.lost_packets,
            total_packets: report.total_packets,
            packet_loss_percent: report.loss_percent,
        })
    }

    fn endpoint(&self, name: &str) -> Result<&NodeEndpoint, ExecutionError> {
        self.topology
            .node(name)
            .ok_or_else(|| ExecutionError::UnknownNode {
                node: name.to_string(),
            })
    }

    async fn run(
        &self,
        node: &NodeEndpoint,
        command: &str,
    ) -> Result<CommandOutput, ExecutionError> {
        Ok(self
            .controller
            .run(node, command, self.command_timeout)
            .await?)
    }

    async fn wireless_address(&self, node: &NodeEndpoint) -> Result<String, ExecutionError> {
        let out = self
            .run(node, &iperf::address_command(&node.interface))
            .await?;
        let address = out.stdout.lines().map(str::trim).find(|l| !l.is_empty());
        match address {
            Some(ip) if out.success() => Ok(ip.to_string()),
            _ => Err(ExecutionError::AddressUnavailable {
                node: node.name.clone(),
            }),
        }
    }

    async fn clean_stale(&self, node: &NodeEndpoint) -> Result<(), ExecutionError> {
        let found = self.run(node, iperf::FIND_STALE).await?;
        if found.success() && !found.stdout.trim().is_empty() {
            warn!(node = %node.name, pids = %found.stdout.trim(), "killing stale iperf processes");
            self.run(node, iperf::KILL_STALE).await?;
        }
        Ok(())
    }

    /// Three times the nominal transfer time plus the management timeout.
    fn client_timeout(&self, execution: &QueuedExecution) -> Duration {
        let expected_secs =
            execution.data_bytes as f64 * 8.0 / (execution.bandwidth_mbps * 1_000_000.0);
        Duration::try_from_secs_f64(expected_secs * 3.0)
            .unwrap_or(Duration::MAX)
            .saturating_add(self.command_timeout)
    }
}

// ── ServerGuard ───────────────────────────────────────────────────────────────

/// Owns a running iperf server until it has been killed.
struct ServerGuard {
    controller: Arc<dyn NodeController>,
    node: NodeEndpoint,
    pid: u32,
    timeout: Duration,
    armed: bool,
}

impl ServerGuard {
    fn new(
        controller: Arc<dyn NodeController>,
        node: NodeEndpoint,
        pid: u32,
        timeout: Duration,
    ) -> Self {
        Self {
            controller,
            node,
            pid,
            timeout,
            armed: true,
        }
    }

    /// Kill the server and disarm.  Failures are logged, never returned: the
    /// next execution's stale-process cleanup catches anything left behind.
    async fn stop(mut self) {
        self.armed = false;
        kill_server(
            Arc::clone(&self.controller),
            self.node.clone(),
            self.pid,
            self.timeout,
        )
        .await;
    }
}

impl Drop for ServerGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(node = %self.node.name, pid = self.pid, "no runtime to stop iperf server");
            return;
        };
        warn!(node = %self.node.name, pid = self.pid, "execution abandoned, stopping iperf server");
        handle.spawn(kill_server(
            Arc::clone(&self.controller),
            self.node.clone(),
            self.pid,
            self.timeout,
        ));
    }
}

async fn kill_server(
    controller: Arc<dyn NodeController>,
    node: NodeEndpoint,
    pid: u32,
    timeout: Duration,
) {
    match controller
        .run(&node, &iperf::kill_command(pid), timeout)
        .await
    {
        Ok(out) if out.success() => debug!(node = %node.name, pid, "iperf server stopped"),
        Ok(out) => warn!(
            node = %node.name,
            pid,
            exit_code = out.exit_code,
            stderr = %out.stderr.trim(),
            "kill of iperf server reported failure"
        ),
        Err(e) => warn!(node = %node.name, pid, "could not stop iperf server: {e}"),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
