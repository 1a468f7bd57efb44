use async_trait::async_trait;
use nalgebra as na;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("registration service failed: {0}")]
    Registration(String),
    #[error("motion execution failed: {0}")]
    Execution(String),
}

pub type Result<T> = std::result::Result<T, ServiceError>;

/// A planned joint-space trajectory, one full joint vector per step.
pub type JointTrajectory = Vec<Vec<f32>>;

/// External registration (ICP) service.
///
/// Takes the wire-encoded reference and live clouds and returns the
/// 16-element row-major rigid transform aligning live onto reference in
/// sensor-local coordinates. Retry policy belongs to the transport, not
/// to callers of this trait.
#[async_trait]
pub trait RegistrationClient: Send + Sync {
    async fn register(&self, reference: Vec<u8>, live: Vec<u8>) -> Result<Vec<f32>>;
}

/// External motion planning and execution service.
///
/// `target` is the commanded tool pose in the base frame, robotics
/// convention. On success the executor may return the planned trajectory
/// for local playback.
#[async_trait]
pub trait MotionExecutor: Send + Sync {
    async fn execute(&mut self, target: na::Isometry3<f32>) -> Result<Option<JointTrajectory>>;
}

/// State bits published by the discrete I/O (PLC) collaborator.
///
/// The transport writes, this core only consumes. `take_*` reads clear the
/// flag so one published edge triggers one reaction.
#[derive(Default)]
pub struct VisionIoState {
    vision_section_changed: AtomicBool,
}

impl VisionIoState {
    pub fn new() -> VisionIoState {
        VisionIoState::default()
    }

    /// Called by the I/O transport when the vision section bit flips on.
    pub fn set_vision_section_changed(&self) {
        self.vision_section_changed.store(true, Ordering::Release);
    }

    pub fn take_vision_section_changed(&self) -> bool {
        self.vision_section_changed.swap(false, Ordering::AcqRel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vision_flag_is_consumed_once() {
        let state = VisionIoState::new();
        assert!(!state.take_vision_section_changed());
        state.set_vision_section_changed();
        assert!(state.take_vision_section_changed());
        assert!(!state.take_vision_section_changed());
    }
}
