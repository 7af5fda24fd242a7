//! Bounded, size-segregated cache of GPU-backed dynamic textures
//!
//! Impostor captures need render-target textures in a handful of power-of-two
//! sizes that change as cameras move. The pool keeps returned textures
//! available for exact-size reuse, bounded per (log2 width, log2 height)
//! bucket; past the cap a checked-in texture is destroyed rather than pooled.
//! This is a bounded free list, not an LRU cache: it trades some reuse for a
//! hard memory bound.

use crate::render::backend::{BackendError, RenderBackend, TextureId};
use slotmap::SlotMap;
use std::collections::{BTreeMap, HashMap, HashSet};
use thiserror::Error;

slotmap::new_key_type! {
    /// Stable handle to a pooled texture
    pub struct TextureKey;
}

/// Texture pool errors
#[derive(Debug, Error)]
pub enum PoolError {
    /// Backend texture creation/destruction failed
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    /// A check-in was attempted for a texture that is not checked out
    #[error("texture {0:?} is not checked out")]
    NotCheckedOut(TextureKey),
}

/// A GPU-backed 2D texture tracked by the pool
#[derive(Debug, Clone, Copy)]
pub struct DynamicTexture {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Backend texture object
    pub id: TextureId,
}

/// Size-bucketed texture cache with checkout/checkin semantics.
///
/// Every tracked texture is in exactly one of two states: available for
/// reuse, or checked out to an impostor instance.
#[derive(Debug)]
pub struct TexturePool {
    textures: SlotMap<TextureKey, DynamicTexture>,
    /// width -> height -> available keys of exactly that size
    available: BTreeMap<u32, BTreeMap<u32, Vec<TextureKey>>>,
    checked_out: HashSet<TextureKey>,
    /// (log2 width, log2 height) -> number of available entries
    bucket_counts: HashMap<(u32, u32), usize>,
    bucket_cap: usize,
}

impl TexturePool {
    /// Create a pool with the given per-bucket cap on available textures
    pub fn new(bucket_cap: usize) -> Self {
        Self {
            textures: SlotMap::with_key(),
            available: BTreeMap::new(),
            checked_out: HashSet::new(),
            bucket_counts: HashMap::new(),
            bucket_cap,
        }
    }

    /// Check out a texture of exactly `width` x `height`.
    ///
    /// Reuses an available texture on an exact size match; otherwise a new
    /// backend texture is created directly into the checked-out set.
    pub fn check_out(
        &mut self,
        width: u32,
        height: u32,
        backend: &mut dyn RenderBackend,
    ) -> Result<TextureKey, PoolError> {
        if let Some(key) = self
            .available
            .get_mut(&width)
            .and_then(|heights| heights.get_mut(&height))
            .and_then(Vec::pop)
        {
            if let Some(count) = self.bucket_counts.get_mut(&Self::bucket(width, height)) {
                *count = count.saturating_sub(1);
            }
            self.checked_out.insert(key);
            log::trace!("texture pool reuse {}x{} -> {:?}", width, height, key);
            return Ok(key);
        }

        let id = backend.create_texture(width, height)?;
        let key = self.textures.insert(DynamicTexture { width, height, id });
        self.checked_out.insert(key);
        log::debug!("texture pool allocate {}x{} -> {:?}", width, height, key);
        Ok(key)
    }

    /// Return a checked-out texture.
    ///
    /// If the texture's size bucket is already at the cap, the texture is
    /// destroyed instead of pooled.
    pub fn check_in(
        &mut self,
        key: TextureKey,
        backend: &mut dyn RenderBackend,
    ) -> Result<(), PoolError> {
        if !self.checked_out.remove(&key) {
            return Err(PoolError::NotCheckedOut(key));
        }
        let texture = self.textures[key];

        let bucket = Self::bucket(texture.width, texture.height);
        let count = self.bucket_counts.entry(bucket).or_insert(0);
        if *count >= self.bucket_cap {
            self.textures.remove(key);
            log::debug!(
                "texture pool bucket {:?} at cap ({}), destroying {}x{}",
                bucket,
                self.bucket_cap,
                texture.width,
                texture.height
            );
            backend.destroy_texture(texture.id)?;
            return Ok(());
        }

        *count += 1;
        self.available
            .entry(texture.width)
            .or_default()
            .entry(texture.height)
            .or_default()
            .push(key);
        Ok(())
    }

    /// Look up a tracked texture
    pub fn get(&self, key: TextureKey) -> Option<&DynamicTexture> {
        self.textures.get(key)
    }

    /// Number of textures currently available for reuse
    pub fn available_count(&self) -> usize {
        self.bucket_counts.values().sum()
    }

    /// Number of textures currently checked out
    pub fn checked_out_count(&self) -> usize {
        self.checked_out.len()
    }

    /// Available entries in the (log2 width, log2 height) bucket
    pub fn bucket_count(&self, log2_width: u32, log2_height: u32) -> usize {
        self.bucket_counts
            .get(&(log2_width, log2_height))
            .copied()
            .unwrap_or(0)
    }

    /// Destroy every tracked texture (shutdown path)
    pub fn destroy_all(&mut self, backend: &mut dyn RenderBackend) -> Result<(), PoolError> {
        for (_, texture) in self.textures.drain() {
            backend.destroy_texture(texture.id)?;
        }
        self.available.clear();
        self.checked_out.clear();
        self.bucket_counts.clear();
        Ok(())
    }

    fn bucket(width: u32, height: u32) -> (u32, u32) {
        (width.max(1).ilog2(), height.max(1).ilog2())
    }
}
