use async_trait::async_trait;
use nalgebra as na;
use remora_controller::point_cloud::PointCloud;
use remora_controller::services::{
    JointTrajectory, MotionExecutor, RegistrationClient, Result, ServiceError,
};
use std::time::Duration;
use tokio::time::sleep;

const IDENTITY: [f32; 16] = [
    1.0, 0.0, 0.0, 0.0, //
    0.0, 1.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0, //
    0.0, 0.0, 0.0, 1.0,
];

/// In-process stand-in for the external registration service.
///
/// Decodes both wire payloads to validate them, then answers with a fixed
/// transform after a configurable latency.
pub struct MockRegistrationService {
    response: Vec<f32>,
    latency: Duration,
}

impl MockRegistrationService {
    pub fn identity() -> MockRegistrationService {
        MockRegistrationService {
            response: IDENTITY.to_vec(),
            latency: Duration::from_millis(50),
        }
    }

    pub fn with_response(response: Vec<f32>, latency: Duration) -> MockRegistrationService {
        MockRegistrationService { response, latency }
    }
}

#[async_trait]
impl RegistrationClient for MockRegistrationService {
    async fn register(&self, reference: Vec<u8>, live: Vec<u8>) -> Result<Vec<f32>> {
        let reference = PointCloud::decode_wire(&reference)
            .map_err(|error| ServiceError::Registration(error.to_string()))?;
        let live = PointCloud::decode_wire(&live)
            .map_err(|error| ServiceError::Registration(error.to_string()))?;
        tracing::debug!(
            "Mock registration of {} live against {} reference points",
            live.len(),
            reference.len()
        );
        sleep(self.latency).await;
        Ok(self.response.clone())
    }
}

/// Executor that only logs the commanded pose and reports success.
pub struct LoggingMotionExecutor;

#[async_trait]
impl MotionExecutor for LoggingMotionExecutor {
    async fn execute(&mut self, target: na::Isometry3<f32>) -> Result<Option<JointTrajectory>> {
        tracing::info!(
            "Motion target [{:.3}, {:.3}, {:.3}]",
            target.translation.x,
            target.translation.y,
            target.translation.z
        );
        Ok(None)
    }
}
