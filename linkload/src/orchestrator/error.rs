/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Failure modes of a single orchestrated execution.
//!
//! Each variant names the step that failed and carries the node and raw
//! output needed to diagnose it from the log line alone.  None of these are
//! retried; the link worker logs them and moves on to the next entry.

use thiserror::Error;

use crate::remote::RemoteError;

#[derive(Debug, Error)]
pub enum ExecutionError {
    /// The destination is not an endpoint of the execution's link.
    #[error("node '{node}' is not an endpoint of link '{link}'")]
    RoleResolution { node: String, link: String },

    /// A node named by the link is missing from the topology.
    #[error("node '{node}' has no configured endpoint")]
    UnknownNode { node: String },

    /// The wireless interface has no IPv4 address.
    #[error("could not determine the wireless address of {node}")]
    AddressUnavailable { node: String },

    /// The station is not associated with its access point.
    #[error("station {node} is not associated: {diagnostic}")]
    LinkNotAssociated { node: String, diagnostic: String },

    /// The server launch did not print a process id.
    #[error("iperf server on {node} did not start: '{output}'")]
    ServerStartFailed { node: String, output: String },

    /// The client finished but its report could not be read.
    #[error("no iperf report found in client output: '{output}'")]
    UnparsableOutput { output: String },

    /// The client command's task panicked.  The server has been stopped.
    #[error("iperf client on {node} aborted: {reason}")]
    ClientAborted { node: String, reason: String },

    /// The management channel itself failed (spawn failure or timeout).
    #[error(transparent)]
    Remote(#[from] RemoteError),
}
