//! Cloud particle volumes and their cached billboard snapshots

pub mod impostor;
pub mod particles;
