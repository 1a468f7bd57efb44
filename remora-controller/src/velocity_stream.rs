use crate::arm_config::VelocityConfig;
use nalgebra as na;
use std::sync::mpsc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq)]
pub struct VelocityCommand {
    pub linear: na::Vector3<f32>,
    pub angular: na::Vector3<f32>,
}

impl VelocityCommand {
    pub fn zero() -> VelocityCommand {
        VelocityCommand {
            linear: na::Vector3::zeros(),
            angular: na::Vector3::zeros(),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.linear == na::Vector3::zeros() && self.angular == na::Vector3::zeros()
    }
}

/// Streams timed velocity commands with a deadman watchdog.
///
/// Any interruption in input delivery stops the robot within one watchdog
/// window instead of letting the last nonzero command run forever.
pub struct VelocityStream {
    max_linear: f32,
    max_angular: f32,
    multiplier: f32,
    deadman_window: Duration,
    requested: Option<VelocityCommand>,
    last_input: Instant,
    stopped: bool,
    sink: mpsc::Sender<VelocityCommand>,
}

impl VelocityStream {
    pub fn new(config: &VelocityConfig, sink: mpsc::Sender<VelocityCommand>) -> VelocityStream {
        VelocityStream {
            max_linear: config.max_linear,
            max_angular: config.max_angular,
            multiplier: 1.0,
            deadman_window: Duration::from_millis(config.deadman_window_ms),
            requested: None,
            last_input: Instant::now(),
            stopped: true,
            sink,
        }
    }

    /// Runtime speed multiplier, never negative.
    pub fn set_multiplier(&mut self, multiplier: f32) {
        self.multiplier = multiplier.max(0.0);
    }

    /// Record a directional input and refresh the watchdog stamp.
    pub fn set_direction(&mut self, linear: na::Vector3<f32>, angular: na::Vector3<f32>) {
        self.requested = Some(VelocityCommand {
            linear: linear * self.max_linear * self.multiplier,
            angular: angular * self.max_angular * self.multiplier,
        });
        self.last_input = Instant::now();
        self.stopped = false;
    }

    /// Stream the last request, or stop once when input goes stale.
    pub fn tick(&mut self) {
        let request = match &self.requested {
            Some(request) => request.clone(),
            None => return,
        };
        if self.last_input.elapsed() > self.deadman_window {
            if !self.stopped {
                tracing::warn!("Velocity input stale, sending stop");
                self.send(VelocityCommand::zero());
                self.stopped = true;
            }
        } else {
            self.send(request);
        }
    }

    fn send(&self, command: VelocityCommand) {
        if self.sink.send(command).is_err() {
            tracing::warn!("Velocity command channel closed, command dropped");
        }
    }
}
