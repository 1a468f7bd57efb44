use lazy_static::lazy_static;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::{fs, include_str};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("error while accessing configuration")]
    IoError(#[from] std::io::Error),
    #[error("error while parsing json")]
    JsonError(#[from] serde_json::error::Error),
    #[error("error while parsing yaml")]
    YamlError(#[from] serde_yaml::Error),
}

type Result<T> = std::result::Result<T, ConfigError>;

/// One revolute joint in the kinematic chain.
///
/// `origin` is the translation from the previous link frame,
/// `axis` the rotation axis in the local frame. Angles are radians.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct JointConfig {
    pub name: String,
    pub origin: Vector3<f32>,
    pub axis: Vector3<f32>,
    pub min_angle: f32,
    pub max_angle: f32,
    pub home: f32,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SensorConfig {
    pub width: u32,
    pub height: u32,
    pub horizontal_fov_degrees: f32,
    pub vertical_fov_degrees: f32,
    pub max_distance: f32,
    /// isotropic position noise magnitude in meters, 0 disables
    pub noise_magnitude: f32,
    pub layer_mask: u32,
    pub master_path: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GuidanceConfig {
    /// tool translation in meters that invalidates the live scan
    pub translation_invalidation: f32,
    /// tool rotation in degrees that invalidates the live scan
    pub rotation_invalidation_degrees: f32,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct JogConfig {
    /// jog speed in rad/s
    pub rate: f32,
    /// radius of the per-link contact probe spheres
    pub link_radius: f32,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct VelocityConfig {
    /// max linear speed in m/s
    pub max_linear: f32,
    /// max angular speed in rad/s
    pub max_angular: f32,
    pub deadman_window_ms: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RobotConfig {
    pub joints: Vec<JointConfig>,
    pub base_translation: Vector3<f32>,
    pub tool_translation: Vector3<f32>,
    pub sensor_mount_translation: Vector3<f32>,
    /// scaled axis-angle rotation of the sensor relative to the tool
    pub sensor_mount_rotation: Vector3<f32>,
    pub sensor: SensorConfig,
    pub guidance: GuidanceConfig,
    pub jog: JogConfig,
    pub velocity: VelocityConfig,
}

lazy_static! {
    static ref INCLUDED_CONFIG: RobotConfig = {
        let json = include_str!("../config/remora.json");
        RobotConfig::parse_json(json).unwrap()
    };
}

impl RobotConfig {
    /// Remora comes with an included config file.
    ///
    /// This file is packaged with the binary
    /// This method retrieves this included version
    pub fn included() -> RobotConfig {
        INCLUDED_CONFIG.clone()
    }

    pub fn parse_json(text: &str) -> Result<RobotConfig> {
        let config = serde_json::from_str(text)?;
        Ok(config)
    }

    pub fn parse_yaml(text: &str) -> Result<RobotConfig> {
        let config = serde_yaml::from_str(text)?;
        Ok(config)
    }

    pub fn serialize_to_json(&self) -> Result<String> {
        let json = serde_json::to_string_pretty(self)?;
        Ok(json)
    }

    pub fn serialize_to_yaml(&self) -> Result<String> {
        let yaml = serde_yaml::to_string(self)?;
        Ok(yaml)
    }

    pub fn save_json(&self, path: &str) -> Result<()> {
        fs::write(path, self.serialize_to_json()?)?;
        Ok(())
    }

    pub fn save_yaml(&self, path: &str) -> Result<()> {
        fs::write(path, self.serialize_to_yaml()?)?;
        Ok(())
    }

    pub fn load_json(path: &str) -> Result<RobotConfig> {
        let text = fs::read_to_string(path)?;
        let config = RobotConfig::parse_json(&text)?;
        Ok(config)
    }

    pub fn load_yaml(path: &str) -> Result<RobotConfig> {
        let text = fs::read_to_string(path)?;
        let config = RobotConfig::parse_yaml(&text)?;
        Ok(config)
    }

    /// Home joint vector in the configured joint order
    pub fn home_vector(&self) -> Vec<f32> {
        self.joints.iter().map(|joint| joint.home).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_included() {
        let _ = RobotConfig::included();
    }

    #[test]
    fn included_has_joints() {
        let config = RobotConfig::included();
        assert!(!config.joints.is_empty());
    }

    #[test]
    fn serialize_to_json() {
        let config = RobotConfig::included();
        let json = config.serialize_to_json().unwrap();
        let parsed_config = RobotConfig::parse_json(&json).unwrap();
        assert_eq!(config, parsed_config);
    }

    #[test]
    fn serialize_to_yaml() {
        let config = RobotConfig::included();
        let yaml = config.serialize_to_yaml().unwrap();
        let parsed_config = RobotConfig::parse_yaml(&yaml).unwrap();
        assert_eq!(config, parsed_config);
    }

    #[test]
    fn home_vector_follows_joint_order() {
        let config = RobotConfig::included();
        let home = config.home_vector();
        assert_eq!(home.len(), config.joints.len());
        for (angle, joint) in home.iter().zip(config.joints.iter()) {
            assert_eq!(*angle, joint.home);
        }
    }
}
