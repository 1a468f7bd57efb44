#![doc = include_str!("../../doc_include.md")]

pub mod arm_config;
pub mod collision_monitor;
pub mod controller;
pub mod frame_store;
pub mod hand_eye;
pub mod joint_jog;
pub mod point_cloud;
pub mod range_sensor;
pub mod scene;
pub mod services;
pub mod velocity_stream;
