use crate::arm_config::SensorConfig;
use crate::frame_store::Frame;
use crate::point_cloud::{CloudError, PointCloud, PointSample};
use crate::scene::Scene;
use nalgebra as na;
use rand::Rng;
use std::path::Path;

/// Simulated eye-in-hand depth sensor.
///
/// Casts a W x H ray grid across the configured frustum and keeps two
/// clouds: `master` is the persisted reference, `scan` the transient live
/// capture invalidated by tool motion.
pub struct RangeSensor {
    config: SensorConfig,
    master: PointCloud,
    scan: PointCloud,
}

impl RangeSensor {
    pub fn new(config: SensorConfig) -> RangeSensor {
        RangeSensor {
            config,
            master: PointCloud::new(Frame::Sensor),
            scan: PointCloud::new(Frame::Sensor),
        }
    }

    pub fn master(&self) -> &PointCloud {
        &self.master
    }

    pub fn scan(&self) -> &PointCloud {
        &self.scan
    }

    pub fn clear_scan(&mut self) {
        self.scan.clear();
    }

    /// Capture a cloud from `sensor_pose` expressed in the frame whose world
    /// pose is `target_pose`. Misses produce no sample, so the cloud is
    /// sparse rather than fixed-size.
    pub fn capture(
        &self,
        scene: &Scene,
        sensor_pose: &na::Isometry3<f32>,
        target_pose: &na::Isometry3<f32>,
        frame: Frame,
    ) -> PointCloud {
        let mut cloud = PointCloud::new(frame);
        let origin = na::Point3::from(sensor_pose.translation.vector);
        let half_horizontal = (self.config.horizontal_fov_degrees * 0.5).to_radians();
        let half_vertical = (self.config.vertical_fov_degrees * 0.5).to_radians();
        let mut rng = rand::thread_rng();
        for row in 0..self.config.height {
            for column in 0..self.config.width {
                let azimuth = grid_angle(column, self.config.width, half_horizontal);
                let elevation = grid_angle(row, self.config.height, half_vertical);
                let local_direction =
                    na::Vector3::new(azimuth.tan(), elevation.tan(), 1.0).normalize();
                let direction = sensor_pose.rotation * local_direction;
                let hit = match scene.cast_ray(
                    origin,
                    direction,
                    self.config.max_distance,
                    self.config.layer_mask,
                ) {
                    Some(hit) => hit,
                    None => continue,
                };
                let mut position = hit.point;
                if self.config.noise_magnitude > 0.0 {
                    let magnitude = self.config.noise_magnitude;
                    position += na::Vector3::new(
                        rng.gen_range(-magnitude..=magnitude),
                        rng.gen_range(-magnitude..=magnitude),
                        rng.gen_range(-magnitude..=magnitude),
                    );
                }
                cloud.push(PointSample::new(
                    target_pose.inverse_transform_point(&position).coords,
                    target_pose.rotation.inverse() * hit.normal,
                    hit.color,
                ));
            }
        }
        cloud
    }

    /// Capture the reference cloud and persist it.
    ///
    /// A failed write is logged and leaves the in-memory master intact.
    pub fn capture_master(&mut self, scene: &Scene, sensor_pose: &na::Isometry3<f32>) {
        self.master = self.capture(scene, sensor_pose, sensor_pose, Frame::Sensor);
        tracing::info!("Captured master cloud with {} points", self.master.len());
        if let Err(error) = self.master.save(Path::new(&self.config.master_path)) {
            tracing::error!("Failed to persist master cloud: {}", error);
        }
    }

    /// Capture the live scan cloud.
    pub fn capture_scan(&mut self, scene: &Scene, sensor_pose: &na::Isometry3<f32>) {
        self.scan = self.capture(scene, sensor_pose, sensor_pose, Frame::Sensor);
        tracing::info!("Captured scan cloud with {} points", self.scan.len());
    }

    /// Restore a previously persisted master cloud.
    ///
    /// A missing file is expected on first run and only logs a warning.
    pub fn load_master(&mut self) {
        match PointCloud::load(Path::new(&self.config.master_path), Frame::Sensor) {
            Ok(cloud) => {
                tracing::info!("Loaded master cloud with {} points", cloud.len());
                self.master = cloud;
            }
            Err(CloudError::FileNotFound { path }) => {
                tracing::warn!("No master cloud at {:?}, starting empty", path);
            }
            Err(error) => {
                tracing::error!("Failed to load master cloud: {}", error);
            }
        }
    }
}

fn grid_angle(index: u32, count: u32, half_angle: f32) -> f32 {
    if count <= 1 {
        return 0.0;
    }
    let normalized = index as f32 / (count - 1) as f32;
    (normalized - 0.5) * 2.0 * half_angle
}
