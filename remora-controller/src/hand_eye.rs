use crate::arm_config::GuidanceConfig;
use crate::frame_store::engine_to_robot_pose;
use crate::point_cloud::PointCloud;
use crate::services::{JointTrajectory, MotionExecutor, RegistrationClient, ServiceError};
use nalgebra as na;
use std::sync::{mpsc, Arc};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GuidanceError {
    #[error("master cloud is empty")]
    EmptyMaster,
    #[error("scan cloud is empty")]
    EmptyScan,
    #[error("a registration request is already in flight")]
    RequestInFlight,
}

type Result<T> = std::result::Result<T, GuidanceError>;

type RegistrationOutcome = std::result::Result<Vec<f32>, ServiceError>;

/// Aligns the live scan to the reference master through the external
/// registration service and turns the result into a tool pose command.
///
/// The sensor is rigidly mounted to the tool, so the tool-to-sensor offset
/// is computed once at startup and assumed static for the session.
pub struct HandEyeEngine {
    offset: na::Isometry3<f32>,
    last_observed_tool: na::Isometry3<f32>,
    translation_threshold: f32,
    /// radians
    rotation_threshold: f32,
    registration: Arc<dyn RegistrationClient>,
    executor: Box<dyn MotionExecutor>,
    outcome_sender: mpsc::Sender<RegistrationOutcome>,
    outcome_receiver: mpsc::Receiver<RegistrationOutcome>,
    pending_correction: Option<na::Isometry3<f32>>,
    in_flight: bool,
}

impl HandEyeEngine {
    pub fn new(
        tool_pose_world: &na::Isometry3<f32>,
        sensor_pose_world: &na::Isometry3<f32>,
        config: &GuidanceConfig,
        registration: Arc<dyn RegistrationClient>,
        executor: Box<dyn MotionExecutor>,
    ) -> HandEyeEngine {
        let (outcome_sender, outcome_receiver) = mpsc::channel();
        HandEyeEngine {
            offset: tool_pose_world.inverse() * sensor_pose_world,
            last_observed_tool: *tool_pose_world,
            translation_threshold: config.translation_invalidation,
            rotation_threshold: config.rotation_invalidation_degrees.to_radians(),
            registration,
            executor,
            outcome_sender,
            outcome_receiver,
            pending_correction: None,
            in_flight: false,
        }
    }

    /// Rigid transform from the tool frame to the sensor frame.
    pub fn offset(&self) -> na::Isometry3<f32> {
        self.offset
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    /// Per-tick motion check. True means the live scan no longer reflects
    /// the current viewpoint and must be cleared by the caller.
    ///
    /// Runs every tick whether or not a correction is in flight. The
    /// last-observed pose only advances when a threshold is exceeded.
    pub fn motion_invalidates(&mut self, tool_pose: &na::Isometry3<f32>) -> bool {
        let translation = na::distance(
            &na::Point3::from(self.last_observed_tool.translation.vector),
            &na::Point3::from(tool_pose.translation.vector),
        );
        let rotation = self.last_observed_tool.rotation.angle_to(&tool_pose.rotation);
        if translation > self.translation_threshold || rotation > self.rotation_threshold {
            self.last_observed_tool = *tool_pose;
            true
        } else {
            false
        }
    }

    /// Submit the reference and live clouds for registration.
    ///
    /// At most one request may be outstanding; the completion lands in a
    /// queue drained on the control tick, never applied from the service
    /// thread.
    pub fn run_guidance(&mut self, master: &PointCloud, scan: &PointCloud) -> Result<()> {
        if master.is_empty() {
            return Err(GuidanceError::EmptyMaster);
        }
        if scan.is_empty() {
            return Err(GuidanceError::EmptyScan);
        }
        if self.in_flight {
            return Err(GuidanceError::RequestInFlight);
        }
        let reference = master.encode_wire(true, true);
        let live = scan.encode_wire(true, true);
        self.in_flight = true;
        let client = Arc::clone(&self.registration);
        let sender = self.outcome_sender.clone();
        tokio::spawn(async move {
            let outcome = client.register(reference, live).await;
            // a closed receiver just means the engine is gone
            let _ = sender.send(outcome);
        });
        tracing::info!("Registration request submitted");
        Ok(())
    }

    /// Move completed registrations into the pending slot.
    pub fn drain_responses(&mut self) {
        while let Ok(outcome) = self.outcome_receiver.try_recv() {
            self.in_flight = false;
            match outcome {
                Ok(values) => match correction_to_isometry(&values) {
                    Some(correction) => {
                        if self.pending_correction.replace(correction).is_some() {
                            tracing::warn!("Unapplied correction overwritten");
                        }
                    }
                    None => tracing::error!(
                        "Malformed correction transform ({} values), no motion commanded",
                        values.len()
                    ),
                },
                Err(error) => tracing::warn!("Registration failed: {}", error),
            }
        }
    }

    /// Apply the queued correction and dispatch the corrected tool pose.
    ///
    /// The correction is a local transform of the sensor frame, by contract
    /// with the registration service. If the service ever returned a
    /// world-frame transform this composition would be wrong.
    pub async fn apply_pending(
        &mut self,
        sensor_pose: &na::Isometry3<f32>,
        tool_pose: &na::Isometry3<f32>,
        base_pose: &na::Isometry3<f32>,
    ) -> Option<JointTrajectory> {
        let correction = self.pending_correction.take()?;
        let sensor_target = sensor_pose * correction.inverse();
        let tool_target = sensor_target * self.offset.inverse();
        let gap = na::distance(
            &na::Point3::from(tool_target.translation.vector),
            &na::Point3::from(tool_pose.translation.vector),
        );
        let command = engine_to_robot_pose(&(base_pose.inverse() * tool_target));
        match self.executor.execute(command).await {
            Ok(trajectory) => {
                tracing::info!("Correction dispatched, position gap {:.4} m", gap);
                trajectory
            }
            Err(error) => {
                tracing::error!("Motion executor rejected correction: {}", error);
                None
            }
        }
    }
}

/// Build a pose from 16 row-major values.
///
/// Rejects wrong sizes, non-finite entries and rotation blocks that are
/// not close to a proper rotation.
fn correction_to_isometry(values: &[f32]) -> Option<na::Isometry3<f32>> {
    if values.len() != 16 || values.iter().any(|value| !value.is_finite()) {
        return None;
    }
    let rotation = na::Matrix3::new(
        values[0], values[1], values[2],
        values[4], values[5], values[6],
        values[8], values[9], values[10],
    );
    if (rotation.determinant() - 1.0).abs() > 0.1 {
        return None;
    }
    let translation = na::Vector3::new(values[3], values[7], values[11]);
    let orientation =
        na::UnitQuaternion::from_rotation_matrix(&na::Rotation3::from_matrix_unchecked(rotation));
    Some(na::Isometry3::from_parts(
        na::Translation3::from(translation),
        orientation,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame_store::Frame;
    use crate::point_cloud::PointSample;
    use approx::assert_relative_eq;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::time::sleep;

    const IDENTITY: [f32; 16] = [
        1.0, 0.0, 0.0, 0.0, //
        0.0, 1.0, 0.0, 0.0, //
        0.0, 0.0, 1.0, 0.0, //
        0.0, 0.0, 0.0, 1.0,
    ];

    struct FixedRegistration {
        response: Vec<f32>,
    }

    #[async_trait]
    impl RegistrationClient for FixedRegistration {
        async fn register(
            &self,
            _reference: Vec<u8>,
            _live: Vec<u8>,
        ) -> crate::services::Result<Vec<f32>> {
            Ok(self.response.clone())
        }
    }

    struct StalledRegistration;

    #[async_trait]
    impl RegistrationClient for StalledRegistration {
        async fn register(
            &self,
            _reference: Vec<u8>,
            _live: Vec<u8>,
        ) -> crate::services::Result<Vec<f32>> {
            sleep(Duration::from_secs(60)).await;
            Ok(IDENTITY.to_vec())
        }
    }

    #[derive(Default)]
    struct CapturingExecutor {
        captured: Arc<Mutex<Option<na::Isometry3<f32>>>>,
    }

    #[async_trait]
    impl MotionExecutor for CapturingExecutor {
        async fn execute(
            &mut self,
            target: na::Isometry3<f32>,
        ) -> crate::services::Result<Option<JointTrajectory>> {
            self.captured.lock().unwrap().replace(target);
            Ok(Some(vec![vec![0.0, 0.1]]))
        }
    }

    fn cloud_with_points(count: usize) -> PointCloud {
        let mut cloud = PointCloud::new(Frame::Sensor);
        for index in 0..count {
            cloud.push(PointSample::new(
                na::Vector3::new(index as f32 * 0.01, 0.0, 0.5),
                na::Vector3::new(0.0, 0.0, -1.0),
                [255, 255, 255],
            ));
        }
        cloud
    }

    fn guidance_config() -> GuidanceConfig {
        GuidanceConfig {
            translation_invalidation: 0.005,
            rotation_invalidation_degrees: 0.1,
        }
    }

    fn tool_and_sensor() -> (na::Isometry3<f32>, na::Isometry3<f32>) {
        let tool = na::Isometry3::from_parts(
            na::Translation3::new(0.2, 0.4, 0.1),
            na::UnitQuaternion::from_euler_angles(0.1, 0.3, -0.2),
        );
        let sensor = tool
            * na::Isometry3::from_parts(
                na::Translation3::new(0.0, 0.03, 0.02),
                na::UnitQuaternion::identity(),
            );
        (tool, sensor)
    }

    fn engine_with(
        registration: Arc<dyn RegistrationClient>,
        executor: Box<dyn MotionExecutor>,
    ) -> HandEyeEngine {
        let (tool, sensor) = tool_and_sensor();
        HandEyeEngine::new(&tool, &sensor, &guidance_config(), registration, executor)
    }

    #[test]
    fn offset_recovers_sensor_pose() {
        let engine = engine_with(
            Arc::new(FixedRegistration {
                response: IDENTITY.to_vec(),
            }),
            Box::<CapturingExecutor>::default(),
        );
        let (tool, sensor) = tool_and_sensor();
        let recovered = tool * engine.offset();
        assert_relative_eq!(
            recovered.translation.vector,
            sensor.translation.vector,
            epsilon = 1.0e-6
        );
        assert!(recovered.rotation.angle_to(&sensor.rotation) < 1.0e-6);
    }

    #[test]
    fn small_motion_does_not_invalidate() {
        let mut engine = engine_with(
            Arc::new(FixedRegistration {
                response: IDENTITY.to_vec(),
            }),
            Box::<CapturingExecutor>::default(),
        );
        let (tool, _) = tool_and_sensor();
        let nudged = na::Isometry3::from_parts(
            na::Translation3::from(tool.translation.vector + na::Vector3::new(0.001, 0.0, 0.0)),
            tool.rotation,
        );
        assert!(!engine.motion_invalidates(&nudged));
    }

    #[test]
    fn cumulative_motion_invalidates() {
        let mut engine = engine_with(
            Arc::new(FixedRegistration {
                response: IDENTITY.to_vec(),
            }),
            Box::<CapturingExecutor>::default(),
        );
        let (tool, _) = tool_and_sensor();
        // last-observed pose must not advance on sub-threshold motion
        for step in 1..=3 {
            let nudged = na::Isometry3::from_parts(
                na::Translation3::from(
                    tool.translation.vector + na::Vector3::new(0.003 * step as f32, 0.0, 0.0),
                ),
                tool.rotation,
            );
            let invalidated = engine.motion_invalidates(&nudged);
            assert_eq!(invalidated, step >= 2, "step {}", step);
            if invalidated {
                break;
            }
        }
    }

    #[test]
    fn rotation_alone_invalidates() {
        let mut engine = engine_with(
            Arc::new(FixedRegistration {
                response: IDENTITY.to_vec(),
            }),
            Box::<CapturingExecutor>::default(),
        );
        let (tool, _) = tool_and_sensor();
        let turned = na::Isometry3::from_parts(
            tool.translation,
            tool.rotation * na::UnitQuaternion::from_axis_angle(&na::Vector3::y_axis(), 0.01),
        );
        assert!(engine.motion_invalidates(&turned));
    }

    #[tokio::test]
    async fn guidance_requires_both_clouds() {
        let mut engine = engine_with(
            Arc::new(FixedRegistration {
                response: IDENTITY.to_vec(),
            }),
            Box::<CapturingExecutor>::default(),
        );
        let empty = PointCloud::new(Frame::Sensor);
        let full = cloud_with_points(10);
        assert!(matches!(
            engine.run_guidance(&empty, &full),
            Err(GuidanceError::EmptyMaster)
        ));
        assert!(matches!(
            engine.run_guidance(&full, &empty),
            Err(GuidanceError::EmptyScan)
        ));
    }

    #[tokio::test]
    async fn second_request_while_in_flight_is_rejected() {
        let mut engine = engine_with(
            Arc::new(StalledRegistration),
            Box::<CapturingExecutor>::default(),
        );
        let master = cloud_with_points(10);
        let scan = cloud_with_points(10);
        engine.run_guidance(&master, &scan).unwrap();
        assert!(matches!(
            engine.run_guidance(&master, &scan),
            Err(GuidanceError::RequestInFlight)
        ));
    }

    #[tokio::test]
    async fn identity_correction_commands_current_pose() {
        let captured = Arc::new(Mutex::new(None));
        let executor = CapturingExecutor {
            captured: Arc::clone(&captured),
        };
        let mut engine = engine_with(
            Arc::new(FixedRegistration {
                response: IDENTITY.to_vec(),
            }),
            Box::new(executor),
        );
        let (tool, sensor) = tool_and_sensor();
        let master = cloud_with_points(100);
        let scan = cloud_with_points(100);
        engine.run_guidance(&master, &scan).unwrap();
        while engine.in_flight() {
            sleep(Duration::from_millis(5)).await;
            engine.drain_responses();
        }
        let base = na::Isometry3::identity();
        let trajectory = engine.apply_pending(&sensor, &tool, &base).await;
        assert!(trajectory.is_some());

        let command = captured.lock().unwrap().take().unwrap();
        let expected = engine_to_robot_pose(&tool);
        assert_relative_eq!(
            command.translation.vector,
            expected.translation.vector,
            epsilon = 1.0e-5
        );
        assert!(command.rotation.angle_to(&expected.rotation) < 1.0e-4);
    }

    #[tokio::test]
    async fn malformed_response_commands_no_motion() {
        let captured = Arc::new(Mutex::new(None));
        let executor = CapturingExecutor {
            captured: Arc::clone(&captured),
        };
        let mut engine = engine_with(
            Arc::new(FixedRegistration {
                response: vec![1.0; 7],
            }),
            Box::new(executor),
        );
        let (tool, sensor) = tool_and_sensor();
        let master = cloud_with_points(10);
        let scan = cloud_with_points(10);
        engine.run_guidance(&master, &scan).unwrap();
        while engine.in_flight() {
            sleep(Duration::from_millis(5)).await;
            engine.drain_responses();
        }
        let base = na::Isometry3::identity();
        assert!(engine.apply_pending(&sensor, &tool, &base).await.is_none());
        assert!(captured.lock().unwrap().is_none());
    }

    #[test]
    fn correction_parsing_places_translation() {
        let mut values = IDENTITY;
        values[3] = 0.1;
        values[7] = -0.2;
        values[11] = 0.3;
        let pose = correction_to_isometry(&values).unwrap();
        assert_relative_eq!(
            pose.translation.vector,
            na::Vector3::new(0.1, -0.2, 0.3),
            epsilon = 1.0e-6
        );
    }

    #[test]
    fn correction_parsing_rejects_bad_input() {
        assert!(correction_to_isometry(&[1.0; 15]).is_none());
        let mut not_finite = IDENTITY;
        not_finite[5] = f32::NAN;
        assert!(correction_to_isometry(&not_finite).is_none());
        let mut reflected = IDENTITY;
        reflected[0] = -1.0;
        assert!(correction_to_isometry(&reflected).is_none());
    }
}
