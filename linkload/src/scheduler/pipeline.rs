/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! What a link worker does with each execution it dequeues.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::estimator::EnergyEstimator;
use crate::orchestrator::{ExecutionError, Orchestrator};
use crate::submission::SubmissionGateway;
use crate::workload::QueuedExecution;

/// Runs one execution to completion.  The scheduler only sees this seam.
#[async_trait]
pub trait ExecutionRunner: Send + Sync {
    async fn run(&self, execution: &QueuedExecution) -> Result<(), ExecutionError>;
}

/// Orchestrate → wait for the power tail → estimate → submit.
pub struct Pipeline {
    orchestrator: Orchestrator,
    estimator: EnergyEstimator,
    gateways: Vec<Arc<dyn SubmissionGateway>>,
    tail_wait: Duration,
}

impl Pipeline {
    pub fn new(
        orchestrator: Orchestrator,
        estimator: EnergyEstimator,
        gateways: Vec<Arc<dyn SubmissionGateway>>,
        tail_wait: Duration,
    ) -> Self {
        Self {
            orchestrator,
            estimator,
            gateways,
            tail_wait,
        }
    }
}

#[async_trait]
impl ExecutionRunner for Pipeline {
    async fn run(&self, execution: &QueuedExecution) -> Result<(), ExecutionError> {
        let result = self.orchestrator.execute(execution).await?;

        debug!(
            exec_id = %execution.execution_id,
            wait_s = self.tail_wait.as_secs(),
            "waiting for trailing power samples"
        );
        tokio::time::sleep(self.tail_wait).await;

        let prediction = self.estimator.estimate(result).await;

        for gateway in &self.gateways {
            if let Err(e) = gateway.submit(&prediction).await {
                warn!(
                    exec_id = %execution.execution_id,
                    gateway = gateway.name(),
                    "submission failed: {e}"
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use chrono::{DateTime, Utc};

    use crate::config::EstimatorSettings;
    use crate::orchestrator::tests::{healthy, topology, FakeNodes};
    use crate::submission::SubmissionError;
    use crate::telemetry::{Sample, TelemetryError, TelemetryField, TelemetrySource, TimeBound};
    use crate::workload::tests::{link, workload};
    use crate::workload::{EnergyPrediction, EstimationMethod};

    struct NoTelemetry;

    #[async_trait]
    impl TelemetrySource for NoTelemetry {
        async fn query(
            &self,
            _node: &str,
            _field: TelemetryField,
            _start: DateTime<Utc>,
            _end: TimeBound,
        ) -> Result<Vec<Sample>, TelemetryError> {
            Ok(Vec::new())
        }
    }

    #[derive(Default)]
    struct RecordingGateway {
        received: Mutex<Vec<EnergyPrediction>>,
        fail: bool,
    }

    #[async_trait]
    impl SubmissionGateway for RecordingGateway {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn submit(&self, prediction: &EnergyPrediction) -> Result<(), SubmissionError> {
            self.received.lock().unwrap().push(prediction.clone());
            if self.fail {
                return Err(SubmissionError::Authentication("denied".into()));
            }
            Ok(())
        }
    }

    fn pipeline(nodes: Arc<FakeNodes>, gateways: Vec<Arc<dyn SubmissionGateway>>) -> Pipeline {
        Pipeline::new(
            Orchestrator::new(nodes, topology(), Duration::from_secs(15)),
            EnergyEstimator::new(Arc::new(NoTelemetry), EstimatorSettings::default()),
            gateways,
            Duration::from_secs(20),
        )
    }

    fn queued() -> QueuedExecution {
        QueuedExecution::bind(workload("node05", "2.4M", "50M"), link(), Utc::now()).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn every_gateway_receives_the_prediction_even_if_one_fails() {
        let failing = Arc::new(RecordingGateway {
            fail: true,
            ..Default::default()
        });
        let healthy_gw = Arc::new(RecordingGateway::default());
        let p = pipeline(
            FakeNodes::new(healthy),
            vec![
                failing.clone() as Arc<dyn SubmissionGateway>,
                healthy_gw.clone() as Arc<dyn SubmissionGateway>,
            ],
        );

        let execution = queued();
        p.run(&execution).await.unwrap();

        for gw in [&failing, &healthy_gw] {
            let received = gw.received.lock().unwrap();
            assert_eq!(received.len(), 1);
            assert_eq!(received[0].execution.execution_id, execution.execution_id);
            assert_eq!(received[0].method, EstimationMethod::Unavailable);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn tail_wait_precedes_estimation() {
        let p = pipeline(FakeNodes::new(healthy), Vec::new());
        let before = tokio::time::Instant::now();
        p.run(&queued()).await.unwrap();
        assert!(before.elapsed() >= Duration::from_secs(20));
    }

    #[tokio::test]
    async fn orchestration_failure_skips_estimation_and_submission() {
        let gw = Arc::new(RecordingGateway::default());
        let nodes = FakeNodes::new(|node, cmd| {
            if cmd.starts_with("iw dev") {
                return crate::orchestrator::tests::ok("Not connected.");
            }
            healthy(node, cmd)
        });
        let p = pipeline(nodes, vec![gw.clone() as Arc<dyn SubmissionGateway>]);

        let err = p.run(&queued()).await.unwrap_err();
        assert!(matches!(err, ExecutionError::LinkNotAssociated { .. }));
        assert!(gw.received.lock().unwrap().is_empty());
    }
}
