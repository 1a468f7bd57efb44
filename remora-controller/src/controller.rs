use crate::arm_config::RobotConfig;
use crate::collision_monitor::CollisionMonitor;
use crate::frame_store::FrameStore;
use crate::hand_eye::HandEyeEngine;
use crate::joint_jog::{JogOutcome, JointJog};
use crate::range_sensor::RangeSensor;
use crate::scene::Scene;
use crate::services::{MotionExecutor, RegistrationClient, VisionIoState};
use crate::velocity_stream::{VelocityCommand, VelocityStream};
use anyhow::{Context, Result};
use nalgebra as na;
use std::collections::VecDeque;
use std::sync::{mpsc, Arc};
use std::time::Duration;
use tokio::task;

#[derive(Debug, Clone)]
pub enum ControlCommand {
    SelectJoint(usize),
    Jog(f32),
    SetVelocity {
        linear: na::Vector3<f32>,
        angular: na::Vector3<f32>,
    },
    SetSpeedMultiplier(f32),
    CaptureMaster,
    CaptureScan,
    RunGuidance,
    Home,
    Shutdown,
}

/// Public handle to the control loop.
///
/// Commands are queued and drained once per tick on the control task; no
/// caller ever touches scene or joint state directly.
pub struct Controller {
    sender: mpsc::Sender<ControlCommand>,
    _join_handle: task::JoinHandle<()>,
}

impl Controller {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &RobotConfig,
        scene: Arc<Scene>,
        registration: Arc<dyn RegistrationClient>,
        executor: Box<dyn MotionExecutor>,
        vision_io: Arc<VisionIoState>,
        joint_commands: mpsc::Sender<Vec<f32>>,
        velocity_commands: mpsc::Sender<VelocityCommand>,
    ) -> Controller {
        let (sender, receiver) = mpsc::channel();
        let internal = ControllerInternal::new(
            config,
            scene,
            registration,
            executor,
            vision_io,
            joint_commands,
            velocity_commands,
            receiver,
        );
        let join_handle = internal.start();
        Controller {
            sender,
            _join_handle: join_handle,
        }
    }

    pub fn select_joint(&self, index: usize) -> Result<()> {
        self.send(ControlCommand::SelectJoint(index))
    }

    pub fn jog(&self, direction: f32) -> Result<()> {
        self.send(ControlCommand::Jog(direction))
    }

    pub fn set_velocity(&self, linear: na::Vector3<f32>, angular: na::Vector3<f32>) -> Result<()> {
        self.send(ControlCommand::SetVelocity { linear, angular })
    }

    pub fn set_speed_multiplier(&self, multiplier: f32) -> Result<()> {
        self.send(ControlCommand::SetSpeedMultiplier(multiplier))
    }

    pub fn capture_master(&self) -> Result<()> {
        self.send(ControlCommand::CaptureMaster)
    }

    pub fn capture_scan(&self) -> Result<()> {
        self.send(ControlCommand::CaptureScan)
    }

    pub fn run_guidance(&self) -> Result<()> {
        self.send(ControlCommand::RunGuidance)
    }

    pub fn home(&self) -> Result<()> {
        self.send(ControlCommand::Home)
    }

    pub fn shutdown(&self) -> Result<()> {
        self.send(ControlCommand::Shutdown)
    }

    fn send(&self, command: ControlCommand) -> Result<()> {
        self.sender
            .send(command)
            .context("Failed to send control command")?;
        Ok(())
    }
}

struct ControllerInternal {
    frame_store: FrameStore,
    scene: Arc<Scene>,
    monitor: Arc<CollisionMonitor>,
    sensor: RangeSensor,
    hand_eye: HandEyeEngine,
    jog: JointJog,
    velocity: VelocityStream,
    vision_io: Arc<VisionIoState>,
    receiver: mpsc::Receiver<ControlCommand>,
    playback: VecDeque<Vec<f32>>,
    jog_input: Option<f32>,
    tick_period: Duration,
}

impl ControllerInternal {
    #[allow(clippy::too_many_arguments)]
    fn new(
        config: &RobotConfig,
        scene: Arc<Scene>,
        registration: Arc<dyn RegistrationClient>,
        executor: Box<dyn MotionExecutor>,
        vision_io: Arc<VisionIoState>,
        joint_commands: mpsc::Sender<Vec<f32>>,
        velocity_commands: mpsc::Sender<VelocityCommand>,
        receiver: mpsc::Receiver<ControlCommand>,
    ) -> ControllerInternal {
        let frame_store = FrameStore::from_config(config);
        let monitor = Arc::new(CollisionMonitor::new(frame_store.link_names()));
        let mut sensor = RangeSensor::new(config.sensor.clone());
        sensor.load_master();
        let hand_eye = HandEyeEngine::new(
            &frame_store.tool_pose_world(),
            &frame_store.sensor_pose_world(),
            &config.guidance,
            registration,
            executor,
        );
        let jog = JointJog::new(
            config.jog.rate,
            config.jog.link_radius,
            frame_store.joint_limits(),
            joint_commands,
        );
        let velocity = VelocityStream::new(&config.velocity, velocity_commands);
        ControllerInternal {
            frame_store,
            scene,
            monitor,
            sensor,
            hand_eye,
            jog,
            velocity,
            vision_io,
            receiver,
            playback: VecDeque::new(),
            jog_input: None,
            tick_period: Duration::from_millis(20),
        }
    }

    fn start(mut self) -> task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(self.tick_period).await;
                if self.check_messages().is_err() {
                    // sender closed or shutdown requested
                    return;
                }
                self.tick().await;
            }
        })
    }

    fn check_messages(&mut self) -> Result<()> {
        loop {
            match self.receiver.try_recv() {
                Ok(command) => match command {
                    ControlCommand::SelectJoint(index) => self.jog.select_joint(index),
                    ControlCommand::Jog(direction) => self.jog_input = Some(direction),
                    ControlCommand::SetVelocity { linear, angular } => {
                        self.velocity.set_direction(linear, angular)
                    }
                    ControlCommand::SetSpeedMultiplier(multiplier) => {
                        self.velocity.set_multiplier(multiplier)
                    }
                    ControlCommand::CaptureMaster => {
                        let sensor_pose = self.frame_store.sensor_pose_world();
                        self.sensor.capture_master(&self.scene, &sensor_pose);
                    }
                    ControlCommand::CaptureScan => {
                        let sensor_pose = self.frame_store.sensor_pose_world();
                        self.sensor.capture_scan(&self.scene, &sensor_pose);
                    }
                    ControlCommand::RunGuidance => {
                        if let Err(error) = self
                            .hand_eye
                            .run_guidance(self.sensor.master(), self.sensor.scan())
                        {
                            tracing::warn!("Guidance not started: {}", error);
                        }
                    }
                    ControlCommand::Home => {
                        self.frame_store.home();
                        self.jog.publish(self.frame_store.angles());
                    }
                    ControlCommand::Shutdown => {
                        tracing::info!("Controller shutting down");
                        return Err(anyhow::anyhow!("Shutdown requested"));
                    }
                },
                Err(mpsc::TryRecvError::Empty) => break,
                Err(mpsc::TryRecvError::Disconnected) => {
                    return Err(anyhow::anyhow!("Sender closed"))
                }
            }
        }
        Ok(())
    }

    /// One complete unit of work.
    ///
    /// Order within the tick is fixed: motion invalidation, then pending
    /// correction application, then jog and velocity streaming.
    async fn tick(&mut self) {
        if self.vision_io.take_vision_section_changed() {
            tracing::info!("Vision section changed, clearing live scan");
            self.sensor.clear_scan();
        }

        if let Some(vector) = self.playback.pop_front() {
            self.frame_store.set_angles(&vector);
        }
        self.frame_store.tick();

        let tool_pose = self.frame_store.tool_pose_world();
        if self.hand_eye.motion_invalidates(&tool_pose) && !self.sensor.scan().is_empty() {
            tracing::info!("Tool moved, live scan invalidated");
            self.sensor.clear_scan();
        }

        self.hand_eye.drain_responses();
        let sensor_pose = self.frame_store.sensor_pose_world();
        let base_pose = self.frame_store.base_pose();
        if let Some(trajectory) = self
            .hand_eye
            .apply_pending(&sensor_pose, &tool_pose, &base_pose)
            .await
        {
            self.playback.extend(trajectory);
        }

        if let Some(direction) = self.jog_input.take() {
            let outcome = self.jog.jog(
                &mut self.frame_store,
                &self.scene,
                &self.monitor,
                direction,
                self.tick_period.as_secs_f32(),
            );
            if outcome == JogOutcome::Committed {
                self.jog.publish(self.frame_store.angles());
            }
        }

        self.velocity.tick();
    }
}
