// Shader module loading and management
//
// Vulkan uses SPIR-V bytecode for shaders. This module reads compiled
// shaders from disk, creates shader modules, and can watch the files for
// hot reload.

use ash::vk;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::Duration;

use super::driver::DeviceDriver;
use super::error::BackendError;
use super::result::result_str;

/// Create a shader module from raw SPIR-V bytes.
///
/// The bytes are copied into a word-aligned buffer but the size handed to
/// the driver is the byte length as given; a length that is not a
/// multiple of four is left for the driver (and validation layers) to
/// reject.
pub fn create_shader_module<D: DeviceDriver + ?Sized>(
    device: &D,
    code: &[u8],
) -> Result<vk::ShaderModule, vk::Result> {
    // SPIR-V is a stream of u32 words; Vec<u32> guarantees the alignment
    // that a &[u8] from disk does not
    let mut words = vec![0u32; (code.len() + 3) / 4];
    for (word, chunk) in words.iter_mut().zip(code.chunks(4)) {
        let mut bytes = [0u8; 4];
        bytes[..chunk.len()].copy_from_slice(chunk);
        *word = u32::from_ne_bytes(bytes);
    }

    let mut create_info = vk::ShaderModuleCreateInfo::builder().code(&words).build();
    create_info.code_size = code.len();

    unsafe { device.create_shader_module(&create_info) }
}

/// Read a whole shader binary into memory.
pub fn read_shader_file(path: &Path) -> Result<Vec<u8>, BackendError> {
    std::fs::read(path).map_err(|source| BackendError::ShaderIo {
        path: path.to_path_buf(),
        source,
    })
}

/// Load a SPIR-V file and create a shader module from it.
///
/// Creation failures are logged here with the file path before being
/// returned.
pub fn load_shader_module<D: DeviceDriver + ?Sized>(
    device: &D,
    path: impl AsRef<Path>,
) -> Result<vk::ShaderModule, BackendError> {
    let path = path.as_ref();
    let code = read_shader_file(path)?;

    match create_shader_module(device, &code) {
        Ok(module) => {
            log::debug!("Loaded shader {:?} ({} bytes)", path, code.len());
            Ok(module)
        }
        Err(result) => {
            log::error!(
                "Failed to create shader module from {:?}: {}",
                path,
                result_str(result)
            );
            Err(BackendError::ShaderCreate {
                path: path.to_path_buf(),
                result,
            })
        }
    }
}

/// Watches shader binaries and reports which ones changed on disk.
///
/// The parent directories are watched rather than the files, so a shader
/// replaced by an atomic rename keeps being tracked.
pub struct ShaderWatcher {
    // Dropping the watcher stops the notify thread
    _watcher: RecommendedWatcher,
    events: Receiver<notify::Result<notify::Event>>,
    watched: Vec<PathBuf>,
}

impl ShaderWatcher {
    pub fn new<P: AsRef<Path>>(paths: &[P]) -> Result<Self, BackendError> {
        let (tx, events) = mpsc::channel();
        let mut watcher = notify::recommended_watcher(tx)?;

        let mut watched = Vec::with_capacity(paths.len());
        let mut directories: Vec<PathBuf> = Vec::new();
        for path in paths {
            let path = path.as_ref();
            let parent = match path.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
                _ => PathBuf::from("."),
            };
            if !directories.contains(&parent) {
                watcher.watch(&parent, RecursiveMode::NonRecursive)?;
                log::debug!("Watching shader directory {:?}", parent);
                directories.push(parent);
            }
            log::info!("Watching shader {:?}", path);
            watched.push(path.to_path_buf());
        }

        Ok(Self {
            _watcher: watcher,
            events,
            watched,
        })
    }

    pub fn watched(&self) -> &[PathBuf] {
        &self.watched
    }

    /// Block up to `timeout` for changes, then drain whatever else queued up.
    ///
    /// Returns the changed paths, deduplicated. `None` means the watcher
    /// thread has gone away.
    pub fn wait_changed(&self, timeout: Duration) -> Option<Vec<PathBuf>> {
        let mut changed = Vec::new();
        match self.events.recv_timeout(timeout) {
            Ok(event) => self.collect(event, &mut changed),
            Err(RecvTimeoutError::Timeout) => return Some(changed),
            Err(RecvTimeoutError::Disconnected) => return None,
        }
        while let Ok(event) = self.events.try_recv() {
            self.collect(event, &mut changed);
        }
        Some(changed)
    }

    fn collect(&self, event: notify::Result<notify::Event>, changed: &mut Vec<PathBuf>) {
        let event = match event {
            Ok(event) => event,
            Err(e) => {
                log::warn!("Shader watch error: {}", e);
                return;
            }
        };

        if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
            return;
        }

        for path in event.paths {
            let known = self.watched.iter().any(|w| path.ends_with(w) || w.ends_with(&path));
            if known && !changed.contains(&path) {
                changed.push(path);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::driver::mock::{Call, MockDevice};
    use std::io::Write;

    // Header of a SPIR-V module: magic, version 1.0, generator, bound, schema
    const SPIRV_HEADER: [u32; 5] = [0x0723_0203, 0x0001_0000, 0, 1, 0];

    fn spirv_bytes() -> Vec<u8> {
        SPIRV_HEADER.iter().flat_map(|w| w.to_ne_bytes()).collect()
    }

    #[test]
    fn code_size_is_byte_length() {
        let device = MockDevice::default();
        create_shader_module(&device, &spirv_bytes()).unwrap();
        assert_eq!(device.calls(), vec![Call::CreateShaderModule { code_size: 20 }]);
    }

    #[test]
    fn unaligned_length_is_passed_through() {
        let device = MockDevice::default();
        create_shader_module(&device, &[1, 2, 3, 4, 5, 6]).unwrap();
        assert_eq!(device.calls(), vec![Call::CreateShaderModule { code_size: 6 }]);
    }

    #[test]
    fn create_failure_is_returned() {
        let device = MockDevice {
            fail_shader: Some(vk::Result::ERROR_INVALID_SHADER_NV),
            ..Default::default()
        };
        let err = create_shader_module(&device, &spirv_bytes()).unwrap_err();
        assert_eq!(err, vk::Result::ERROR_INVALID_SHADER_NV);
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&spirv_bytes()).unwrap();

        let device = MockDevice::default();
        let module = load_shader_module(&device, file.path()).unwrap();
        assert_ne!(module, vk::ShaderModule::null());
        assert_eq!(device.calls(), vec![Call::CreateShaderModule { code_size: 20 }]);
    }

    #[test]
    fn missing_file_reports_path_without_driver_call() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.spv");

        let device = MockDevice::default();
        let err = load_shader_module(&device, &path).unwrap_err();
        match err {
            BackendError::ShaderIo { path: reported, .. } => assert_eq!(reported, path),
            other => panic!("unexpected error: {other}"),
        }
        assert!(device.calls().is_empty());
    }

    #[test]
    fn driver_failure_carries_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&spirv_bytes()).unwrap();

        let device = MockDevice {
            fail_shader: Some(vk::Result::ERROR_OUT_OF_HOST_MEMORY),
            ..Default::default()
        };
        let err = load_shader_module(&device, file.path()).unwrap_err();
        assert!(matches!(
            err,
            BackendError::ShaderCreate { result: vk::Result::ERROR_OUT_OF_HOST_MEMORY, .. }
        ));
    }

    #[test]
    fn watching_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("gone").join("nope.spv");
        assert!(matches!(ShaderWatcher::new(&[missing]), Err(BackendError::Watch(_))));
    }

    /// Collect changes until `path` shows up or `deadline` passes.
    fn wait_for(watcher: &ShaderWatcher, path: &Path, deadline: Duration) -> bool {
        let start = std::time::Instant::now();
        while start.elapsed() < deadline {
            match watcher.wait_changed(Duration::from_millis(100)) {
                Some(changed) if changed.iter().any(|p| p == path) => return true,
                Some(_) => {}
                None => return false,
            }
        }
        false
    }

    /// Swallow events until the watcher has been quiet for a while.
    fn settle(watcher: &ShaderWatcher) {
        let quiet = Duration::from_millis(300);
        loop {
            let start = std::time::Instant::now();
            match watcher.wait_changed(quiet) {
                Some(changed) if changed.is_empty() && start.elapsed() >= quiet => break,
                Some(_) => {}
                None => break,
            }
        }
    }

    #[test]
    fn edits_after_atomic_replace_are_seen() {
        let dir = tempfile::tempdir().unwrap();
        let shader = dir.path().join("a.spv");
        let staged = dir.path().join("a.spv.tmp");
        std::fs::write(&shader, spirv_bytes()).unwrap();
        std::fs::write(&staged, spirv_bytes()).unwrap();

        let watcher = ShaderWatcher::new(&[&shader]).unwrap();

        std::fs::rename(&staged, &shader).unwrap();
        assert!(wait_for(&watcher, &shader, Duration::from_secs(5)));
        settle(&watcher);

        std::fs::write(&shader, spirv_bytes()).unwrap();
        assert!(wait_for(&watcher, &shader, Duration::from_secs(5)));
    }

    #[test]
    fn siblings_in_watched_directory_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let shader = dir.path().join("a.spv");
        let other = dir.path().join("b.spv");
        std::fs::write(&shader, spirv_bytes()).unwrap();

        let watcher = ShaderWatcher::new(&[&shader]).unwrap();
        std::fs::write(&other, spirv_bytes()).unwrap();
        settle(&watcher);

        std::fs::write(&shader, spirv_bytes()).unwrap();
        assert!(wait_for(&watcher, &shader, Duration::from_secs(5)));
        assert!(!wait_for(&watcher, &other, Duration::from_millis(300)));
    }

    #[test]
    fn idle_watcher_times_out_empty() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let watcher = ShaderWatcher::new(&[file.path()]).unwrap();
        assert_eq!(watcher.watched(), &[file.path().to_path_buf()]);
        assert_eq!(watcher.wait_changed(Duration::from_millis(10)), Some(vec![]));
    }
}
