//! Rendering abstractions: backend boundary, lights, materials and the
//! pooled dynamic textures impostor captures draw into

pub mod backend;
pub mod lighting;
pub mod material;
pub mod texture_pool;
