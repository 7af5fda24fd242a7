//! Spatial acceleration structures

pub mod bounds_tree;
