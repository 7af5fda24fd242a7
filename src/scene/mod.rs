//! Scene-level types: bounds, camera, instances and the per-frame manager

pub mod bounds;
pub mod camera;
pub mod instance;
pub mod scene_manager;
