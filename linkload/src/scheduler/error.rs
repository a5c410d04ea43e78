/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Errors surfaced synchronously by [`LinkScheduler::enqueue`].
//!
//! Everything that can go wrong after a workload has been accepted is an
//! [`ExecutionError`](crate::orchestrator::ExecutionError) and stays inside
//! the link worker.
//!
//! [`LinkScheduler::enqueue`]: super::LinkScheduler::enqueue

use thiserror::Error;

use crate::units::UnitError;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchedulerError {
    /// The destination is not an endpoint of any configured link.
    #[error("destination node '{node}' is not part of any link")]
    UnknownDestination { node: String },

    /// Bandwidth or data amount could not be parsed.
    #[error(transparent)]
    InvalidWorkload(#[from] UnitError),

    /// [`LinkScheduler::shutdown`](super::LinkScheduler::shutdown) has been
    /// called.
    #[error("scheduler is shutting down")]
    ShuttingDown,
}
