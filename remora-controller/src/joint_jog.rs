use crate::collision_monitor::CollisionMonitor;
use crate::frame_store::FrameStore;
use crate::scene::Scene;
use std::f32::consts::PI;
use std::sync::mpsc;

/// Result of one speculative jog tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JogOutcome {
    Idle,
    Committed,
    RolledBack,
}

/// Wrap an angle into (-pi, pi].
pub fn wrap_angle(angle: f32) -> f32 {
    let wrapped = (angle + PI).rem_euclid(2.0 * PI) - PI;
    // rem_euclid lands -pi on the open end of the interval
    #[allow(clippy::float_cmp)]
    if wrapped == -PI {
        PI
    } else {
        wrapped
    }
}

/// Collision-gated joint jogging.
///
/// A jog is applied speculatively: the delta goes to the joint, the contact
/// state is refreshed, and on any link contact the full joint vector is
/// restored from the absolute pre-move snapshot. Snapshot restore rather
/// than a compensating delta keeps repeated rollbacks drift-free.
pub struct JointJog {
    selected: usize,
    /// rad/s
    rate: f32,
    link_radius: f32,
    limits: Vec<(f32, f32)>,
    publisher: mpsc::Sender<Vec<f32>>,
}

impl JointJog {
    pub fn new(
        rate: f32,
        link_radius: f32,
        limits: Vec<(f32, f32)>,
        publisher: mpsc::Sender<Vec<f32>>,
    ) -> JointJog {
        JointJog {
            selected: 0,
            rate,
            link_radius,
            limits,
            publisher,
        }
    }

    /// Select which joint receives jog input, clamped to the joint count.
    pub fn select_joint(&mut self, index: usize) {
        if self.limits.is_empty() {
            self.selected = 0;
            return;
        }
        self.selected = index.min(self.limits.len() - 1);
    }

    pub fn selected(&self) -> usize {
        self.selected
    }

    /// Apply one speculative jog step for the selected joint.
    pub fn jog(
        &mut self,
        store: &mut FrameStore,
        scene: &Scene,
        monitor: &CollisionMonitor,
        direction: f32,
        dt: f32,
    ) -> JogOutcome {
        if direction == 0.0 || self.limits.is_empty() || store.joint_count() == 0 {
            return JogOutcome::Idle;
        }
        let index = self.selected;
        let snapshot: Vec<f32> = store.angles().to_vec();
        let delta = direction * self.rate * dt;
        let mut next = wrap_angle(snapshot[index] + delta);
        let (min_angle, max_angle) = self.limits[index];
        if next < min_angle || next > max_angle {
            tracing::debug!(
                "Jog on joint {} clamped to limits [{:.3}, {:.3}]",
                index,
                min_angle,
                max_angle
            );
            next = next.clamp(min_angle, max_angle);
        }

        store.set_joint_angle(index, next);
        store.tick();

        let links: Vec<(String, nalgebra::Point3<f32>)> = store
            .link_names()
            .into_iter()
            .zip(store.link_points().iter().copied())
            .collect();
        scene.probe_contacts(&links, self.link_radius, monitor);

        if monitor.any_collision() {
            store.set_angles(&snapshot);
            store.tick();
            tracing::warn!("Jog on joint {} rolled back on collision", index);
            JogOutcome::RolledBack
        } else {
            JogOutcome::Committed
        }
    }

    /// Emit the committed joint vector to the motion command channel.
    ///
    /// Distinct from the speculative per-tick joint writes, which stay
    /// local to the frame store.
    pub fn publish(&self, angles: &[f32]) {
        if self.publisher.send(angles.to_vec()).is_err() {
            tracing::warn!("Joint command channel closed, publish dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arm_config::{JointConfig, RobotConfig};
    use crate::scene::{ColliderShape, Material, SceneObject};
    use approx::assert_relative_eq;
    use nalgebra as na;

    fn single_joint_config() -> RobotConfig {
        let mut config = RobotConfig::included();
        config.joints = vec![JointConfig {
            name: "swing".to_owned(),
            origin: na::Vector3::new(0.0, 0.1, 0.0),
            axis: na::Vector3::new(0.0, 1.0, 0.0),
            min_angle: -PI,
            max_angle: PI,
            home: 0.0,
        }];
        config.base_translation = na::Vector3::zeros();
        config.tool_translation = na::Vector3::new(0.0, 0.0, 0.3);
        config
    }

    fn jog_fixture(config: &RobotConfig) -> (FrameStore, CollisionMonitor, JointJog) {
        let store = FrameStore::from_config(config);
        let monitor = CollisionMonitor::new(store.link_names());
        let (sender, _receiver) = mpsc::channel();
        let jog = JointJog::new(1.0, 0.04, store.joint_limits(), sender);
        (store, monitor, jog)
    }

    /// Obstacle placed where the tool lands after a +0.5 rad jog.
    fn blocking_scene() -> Scene {
        let mut scene = Scene::new();
        let target = na::Vector3::new(0.3 * 0.5f32.sin(), 0.1, 0.3 * 0.5f32.cos());
        scene.add_object(SceneObject::new(
            "obstacle",
            na::Isometry3::translation(target.x, target.y, target.z),
            ColliderShape::Sphere { radius: 0.04 },
            Material::flat([200, 40, 40]),
            1,
        ));
        scene
    }

    #[test]
    fn wrap_angle_stays_in_half_open_interval() {
        assert_relative_eq!(wrap_angle(0.3), 0.3);
        assert_relative_eq!(wrap_angle(PI + 0.1), -PI + 0.1, epsilon = 1.0e-6);
        assert_relative_eq!(wrap_angle(-PI - 0.1), PI - 0.1, epsilon = 1.0e-6);
        assert_relative_eq!(wrap_angle(PI), PI);
        assert_relative_eq!(wrap_angle(-PI), PI);
    }

    #[test]
    fn free_jog_commits() {
        let config = single_joint_config();
        let (mut store, monitor, mut jog) = jog_fixture(&config);
        let outcome = jog.jog(&mut store, &Scene::new(), &monitor, 1.0, 0.5);
        assert_eq!(outcome, JogOutcome::Committed);
        assert_relative_eq!(store.angles()[0], 0.5);
    }

    #[test]
    fn blocked_jog_rolls_back_exactly() {
        let config = single_joint_config();
        let (mut store, monitor, mut jog) = jog_fixture(&config);
        let before = store.angles().to_vec();
        let outcome = jog.jog(&mut store, &blocking_scene(), &monitor, 1.0, 0.5);
        assert_eq!(outcome, JogOutcome::RolledBack);
        assert_eq!(store.angles(), before.as_slice());
    }

    #[test]
    fn repeated_rollbacks_do_not_drift() {
        let config = single_joint_config();
        let (mut store, monitor, mut jog) = jog_fixture(&config);
        let scene = blocking_scene();
        let before = store.angles().to_vec();
        for _ in 0..5 {
            let outcome = jog.jog(&mut store, &scene, &monitor, 1.0, 0.5);
            assert_eq!(outcome, JogOutcome::RolledBack);
        }
        assert_eq!(store.angles(), before.as_slice());
    }

    #[test]
    fn zero_direction_is_idle() {
        let config = single_joint_config();
        let (mut store, monitor, mut jog) = jog_fixture(&config);
        let outcome = jog.jog(&mut store, &Scene::new(), &monitor, 0.0, 0.5);
        assert_eq!(outcome, JogOutcome::Idle);
    }

    #[test]
    fn selection_clamps_to_joint_count() {
        let config = single_joint_config();
        let (_, _, mut jog) = jog_fixture(&config);
        jog.select_joint(10);
        assert_eq!(jog.selected(), 0);
    }

    #[test]
    fn jog_respects_joint_limits() {
        let mut config = single_joint_config();
        config.joints[0].max_angle = 0.3;
        let (mut store, monitor, mut jog) = jog_fixture(&config);
        let outcome = jog.jog(&mut store, &Scene::new(), &monitor, 1.0, 0.5);
        assert_eq!(outcome, JogOutcome::Committed);
        assert_relative_eq!(store.angles()[0], 0.3);
    }

    #[test]
    fn publish_emits_committed_vector() {
        let config = single_joint_config();
        let store = FrameStore::from_config(&config);
        let (sender, receiver) = mpsc::channel();
        let jog = JointJog::new(1.0, 0.04, store.joint_limits(), sender);
        jog.publish(&[0.25]);
        assert_eq!(receiver.try_recv().unwrap(), vec![0.25]);
    }
}
