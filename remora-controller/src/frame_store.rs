use crate::arm_config::RobotConfig;
use nalgebra as na;
use std::collections::HashSet;

/// Coordinate frame a pose or cloud is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame {
    World,
    Base,
    Tool,
    Sensor,
}

impl Frame {
    pub fn wire_tag(&self) -> u8 {
        match self {
            Frame::World => 0,
            Frame::Base => 1,
            Frame::Tool => 2,
            Frame::Sensor => 3,
        }
    }

    pub fn from_wire_tag(tag: u8) -> Option<Frame> {
        match tag {
            0 => Some(Frame::World),
            1 => Some(Frame::Base),
            2 => Some(Frame::Tool),
            3 => Some(Frame::Sensor),
            _ => None,
        }
    }
}

/// Convert a position from the internal engine convention
/// (X right, Y up, Z forward, left-handed) to the robotics convention
/// (X forward, Y left, Z up, right-handed).
///
/// This permutation is the only place coordinates cross the
/// engine/robot boundary. Do not re-derive it anywhere else.
pub fn engine_to_robot_position(position: &na::Vector3<f32>) -> na::Vector3<f32> {
    na::Vector3::new(position.z, -position.x, position.y)
}

pub fn robot_to_engine_position(position: &na::Vector3<f32>) -> na::Vector3<f32> {
    na::Vector3::new(-position.y, position.z, position.x)
}

/// Orientation counterpart of [`engine_to_robot_position`].
///
/// The axis permutation flips handedness, so the vector part maps as a
/// pseudo-vector: `(x, y, z, w) -> (-z, x, -y, w)`.
pub fn engine_to_robot_orientation(orientation: &na::UnitQuaternion<f32>) -> na::UnitQuaternion<f32> {
    let q = orientation.quaternion();
    na::UnitQuaternion::from_quaternion(na::Quaternion::new(q.w, -q.k, q.i, -q.j))
}

pub fn robot_to_engine_orientation(orientation: &na::UnitQuaternion<f32>) -> na::UnitQuaternion<f32> {
    let q = orientation.quaternion();
    na::UnitQuaternion::from_quaternion(na::Quaternion::new(q.w, q.j, -q.k, -q.i))
}

pub fn engine_to_robot_pose(pose: &na::Isometry3<f32>) -> na::Isometry3<f32> {
    na::Isometry3::from_parts(
        na::Translation3::from(engine_to_robot_position(&pose.translation.vector)),
        engine_to_robot_orientation(&pose.rotation),
    )
}

pub fn robot_to_engine_pose(pose: &na::Isometry3<f32>) -> na::Isometry3<f32> {
    na::Isometry3::from_parts(
        na::Translation3::from(robot_to_engine_position(&pose.translation.vector)),
        robot_to_engine_orientation(&pose.rotation),
    )
}

struct JointEntry {
    name: String,
    origin: na::Translation3<f32>,
    axis: na::Unit<na::Vector3<f32>>,
    min_angle: f32,
    max_angle: f32,
}

/// Single source of truth for joint angles and derived poses.
///
/// All internal math happens in the engine convention; consumers that talk
/// to external robotics services go through the `*_robot` accessors.
pub struct FrameStore {
    joints: Vec<JointEntry>,
    angles: Vec<f32>,
    home: Vec<f32>,
    base_pose: na::Isometry3<f32>,
    tool_offset: na::Translation3<f32>,
    sensor_mount: na::Isometry3<f32>,
    tool_pose_world: na::Isometry3<f32>,
    link_points: Vec<na::Point3<f32>>,
}

impl FrameStore {
    /// Build the joint map from the configured joint list.
    ///
    /// Duplicate joint names are rejected, first occurrence wins. An empty
    /// joint list is logged and leaves the store with an empty set rather
    /// than failing.
    pub fn from_config(config: &RobotConfig) -> FrameStore {
        let mut joints = Vec::new();
        let mut home = Vec::new();
        let mut seen = HashSet::new();
        for joint in &config.joints {
            if !seen.insert(joint.name.clone()) {
                tracing::warn!("Duplicate joint name {:?} dropped", joint.name);
                continue;
            }
            let axis = match na::Unit::try_new(joint.axis, 1.0e-6) {
                Some(axis) => axis,
                None => {
                    tracing::warn!(
                        "Joint {:?} has a degenerate axis, using Y up",
                        joint.name
                    );
                    na::Vector3::y_axis()
                }
            };
            joints.push(JointEntry {
                name: joint.name.clone(),
                origin: na::Translation3::from(joint.origin),
                axis,
                min_angle: joint.min_angle,
                max_angle: joint.max_angle,
            });
            home.push(joint.home);
        }
        if joints.is_empty() {
            tracing::error!("No joints found in configuration, frame store is empty");
        }
        let angles = home.clone();
        let mut store = FrameStore {
            joints,
            angles,
            home,
            base_pose: na::Isometry3::from_parts(
                na::Translation3::from(config.base_translation),
                na::UnitQuaternion::identity(),
            ),
            tool_offset: na::Translation3::from(config.tool_translation),
            sensor_mount: na::Isometry3::from_parts(
                na::Translation3::from(config.sensor_mount_translation),
                na::UnitQuaternion::from_scaled_axis(config.sensor_mount_rotation),
            ),
            tool_pose_world: na::Isometry3::identity(),
            link_points: Vec::new(),
        };
        store.tick();
        store
    }

    /// Recompute the derived poses from the current joint angles.
    pub fn tick(&mut self) {
        self.link_points.clear();
        let mut pose = self.base_pose;
        for (joint, angle) in self.joints.iter().zip(self.angles.iter()) {
            pose = pose * joint.origin;
            self.link_points.push(na::Point3::from(pose.translation.vector));
            pose = pose * na::UnitQuaternion::from_axis_angle(&joint.axis, *angle);
        }
        pose = pose * self.tool_offset;
        self.link_points.push(na::Point3::from(pose.translation.vector));
        self.tool_pose_world = pose;
    }

    pub fn joint_count(&self) -> usize {
        self.joints.len()
    }

    pub fn joint_names(&self) -> Vec<&str> {
        self.joints.iter().map(|joint| joint.name.as_str()).collect()
    }

    /// Names used for contact reporting: one per joint plus the tool.
    pub fn link_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.joints.iter().map(|joint| joint.name.clone()).collect();
        names.push("tool".to_owned());
        names
    }

    pub fn joint_limits(&self) -> Vec<(f32, f32)> {
        self.joints
            .iter()
            .map(|joint| (joint.min_angle, joint.max_angle))
            .collect()
    }

    pub fn angles(&self) -> &[f32] {
        &self.angles
    }

    pub fn set_angles(&mut self, angles: &[f32]) {
        if angles.len() != self.angles.len() {
            tracing::warn!(
                "Joint vector length {} does not match joint count {}, ignored",
                angles.len(),
                self.angles.len()
            );
            return;
        }
        self.angles.copy_from_slice(angles);
    }

    pub fn set_joint_angle(&mut self, index: usize, angle: f32) {
        if let Some(slot) = self.angles.get_mut(index) {
            *slot = angle;
        }
    }

    /// Snap the joint vector back to the configured home position.
    pub fn home(&mut self) {
        self.angles.copy_from_slice(&self.home);
        self.tick();
    }

    pub fn base_pose(&self) -> na::Isometry3<f32> {
        self.base_pose
    }

    /// Tool pose in the world frame, engine convention.
    pub fn tool_pose_world(&self) -> na::Isometry3<f32> {
        self.tool_pose_world
    }

    /// Tool pose relative to the base frame, engine convention.
    pub fn tool_pose_base(&self) -> na::Isometry3<f32> {
        self.base_pose.inverse() * self.tool_pose_world
    }

    /// Tool pose relative to the base frame, robotics convention.
    pub fn tool_pose_base_robot(&self) -> na::Isometry3<f32> {
        engine_to_robot_pose(&self.tool_pose_base())
    }

    /// Sensor pose in the world frame, engine convention.
    pub fn sensor_pose_world(&self) -> na::Isometry3<f32> {
        self.tool_pose_world * self.sensor_mount
    }

    /// Per-link probe points in the world frame, joint origins plus tool tip.
    pub fn link_points(&self) -> &[na::Point3<f32>] {
        &self.link_points
    }
}
