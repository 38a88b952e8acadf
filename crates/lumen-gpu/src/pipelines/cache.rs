//! Pipeline cache persisted across runs.
//!
//! The cache file holds opaque driver bytes. Reading and writing it is best
//! effort: every failure is logged and the renderer carries on.

use crate::context::GpuContext;
use crate::error::{GpuError, Result};
use ash::vk;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Read a previously persisted cache. Returns no bytes when there is nothing usable.
pub fn load_cache_data(path: &Path) -> Vec<u8> {
    match std::fs::read(path) {
        Ok(data) => {
            tracing::trace!("Loaded {} bytes of pipeline cache from {}", data.len(), path.display());
            data
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            tracing::trace!("No pipeline cache at {}, starting empty", path.display());
            Vec::new()
        }
        Err(e) => {
            tracing::warn!("Could not read pipeline cache {}: {e}", path.display());
            Vec::new()
        }
    }
}

/// Write `data` next to `path` and rename it into place.
pub fn persist_cache_data(path: &Path, data: &[u8]) -> io::Result<()> {
    let mut temp_name = path.file_name().unwrap_or_default().to_os_string();
    temp_name.push(".tmp");
    let temp_path = path.with_file_name(temp_name);

    std::fs::write(&temp_path, data)?;
    if let Err(e) = std::fs::rename(&temp_path, path) {
        let _ = std::fs::remove_file(&temp_path);
        return Err(e);
    }
    Ok(())
}

/// The device's pipeline cache. Written back to disk on drop.
pub struct PipelineCache {
    device: Arc<ash::Device>,
    cache: vk::PipelineCache,
    path: PathBuf,
}

impl PipelineCache {
    /// Create the cache, seeded from `path` when the file exists.
    pub fn new(ctx: &GpuContext, path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let initial_data = load_cache_data(&path);

        let create = |data: &[u8]| {
            let create_info = vk::PipelineCacheCreateInfo::default().initial_data(data);
            unsafe { ctx.device().create_pipeline_cache(&create_info, None) }
        };

        let cache = match create(&initial_data) {
            Ok(cache) => cache,
            Err(e) if !initial_data.is_empty() => {
                tracing::warn!("Driver rejected pipeline cache {} ({e}), starting empty", path.display());
                create(&[]).map_err(|e| GpuError::call("vkCreatePipelineCache failed", e, "pipeline cache"))?
            }
            Err(e) => return Err(GpuError::call("vkCreatePipelineCache failed", e, "pipeline cache")),
        };
        ctx.set_debug_name(cache, "pipeline cache");

        Ok(Self {
            device: ctx.shared_device(),
            cache,
            path,
        })
    }

    pub const fn handle(&self) -> vk::PipelineCache {
        self.cache
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the current cache contents to disk. Failures are logged.
    pub fn save(&self) {
        let data = match unsafe { self.device.get_pipeline_cache_data(self.cache) } {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!("vkGetPipelineCacheData failed: {e}");
                return;
            }
        };
        if data.is_empty() {
            tracing::warn!("Pipeline cache is empty, not writing {}", self.path.display());
            return;
        }
        match persist_cache_data(&self.path, &data) {
            Ok(()) => tracing::trace!("Wrote {} bytes of pipeline cache to {}", data.len(), self.path.display()),
            Err(e) => tracing::warn!("Could not write pipeline cache {}: {e}", self.path.display()),
        }
    }
}

impl Drop for PipelineCache {
    fn drop(&mut self) {
        self.save();
        unsafe { self.device.destroy_pipeline_cache(self.cache, None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("lumen-cache-{}-{name}", std::process::id()))
    }

    #[test]
    fn missing_file_loads_empty() {
        assert!(load_cache_data(&scratch_path("missing.bin")).is_empty());
    }

    #[test]
    fn persisted_bytes_load_back() {
        let path = scratch_path("roundtrip.bin");
        let data = [7_u8, 1, 2, 3, 255];

        persist_cache_data(&path, &data).expect("write cache");
        assert_eq!(load_cache_data(&path), data);

        let mut temp = path.file_name().unwrap_or_default().to_os_string();
        temp.push(".tmp");
        assert!(!path.with_file_name(temp).exists());

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn persisting_overwrites_previous_contents() {
        let path = scratch_path("overwrite.bin");
        persist_cache_data(&path, &[1; 32]).expect("first write");
        persist_cache_data(&path, &[2; 4]).expect("second write");
        assert_eq!(load_cache_data(&path), vec![2; 4]);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn missing_directory_is_an_error_not_a_panic() {
        let path = scratch_path("no-such-dir").join("cache.bin");
        assert!(persist_cache_data(&path, &[1, 2, 3]).is_err());
    }
}
