//! Model Checkpointing
//!
//! Save and load model weights for persistence.

use std::fs;
use std::path::{Path, PathBuf};

use burn::prelude::*;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};
use tracing::{debug, info, warn};

use crate::error::{Result, SpotbotError};

/// Extension the recorder writes
pub const CHECKPOINT_EXTENSION: &str = "mpk";

fn recorder() -> NamedMpkFileRecorder<FullPrecisionSettings> {
    NamedMpkFileRecorder::<FullPrecisionSettings>::new()
}

/// Path the recorder actually writes for `path`
pub fn with_checkpoint_extension<P: AsRef<Path>>(path: P) -> PathBuf {
    path.as_ref().with_extension(CHECKPOINT_EXTENSION)
}

/// Save a module's record to `path` (extension normalized to `.mpk`)
pub fn save_module<B, M>(model: &M, path: &Path) -> Result<PathBuf>
where
    B: Backend,
    M: Module<B>,
{
    let path = with_checkpoint_extension(path);
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    model.clone().save_file(&path, &recorder())?;
    debug!("Saved weights to {:?}", path);
    Ok(path)
}

/// Load a record from `path` into `model`.
///
/// Missing files are reported as [`SpotbotError::Checkpoint`]; callers that
/// tolerate a cold start check [`checkpoint_exists`] first.
pub fn load_module<B, M>(model: M, path: &Path, device: &B::Device) -> Result<M>
where
    B: Backend,
    M: Module<B>,
{
    let path = with_checkpoint_extension(path);
    if !path.exists() {
        return Err(SpotbotError::Checkpoint(format!(
            "checkpoint not found: {}",
            path.display()
        )));
    }

    let model = model.load_file(&path, &recorder(), device)?;
    debug!("Loaded weights from {:?}", path);
    Ok(model)
}

/// Whether a checkpoint exists for `path`
pub fn checkpoint_exists<P: AsRef<Path>>(path: P) -> bool {
    with_checkpoint_extension(path).exists()
}

/// Rotating checkpoint directory
pub struct Checkpointer {
    /// Directory for checkpoints
    checkpoint_dir: PathBuf,
    /// Maximum checkpoints to keep
    max_checkpoints: usize,
}

impl Checkpointer {
    /// Create a new checkpointer
    pub fn new<P: AsRef<Path>>(checkpoint_dir: P, max_checkpoints: usize) -> Self {
        let checkpoint_dir = checkpoint_dir.as_ref().to_path_buf();

        if !checkpoint_dir.exists() {
            if let Err(e) = fs::create_dir_all(&checkpoint_dir) {
                warn!("Failed to create checkpoint directory: {}", e);
            }
        }

        Self {
            checkpoint_dir,
            max_checkpoints: max_checkpoints.max(1),
        }
    }

    /// Get checkpoint path for a given name
    pub fn checkpoint_path(&self, name: &str) -> PathBuf {
        self.checkpoint_dir
            .join(format!("{}.{}", name, CHECKPOINT_EXTENSION))
    }

    /// Save a model under `name`, then prune old checkpoints
    pub fn save<B, M>(&self, model: &M, name: &str) -> Result<PathBuf>
    where
        B: Backend,
        M: Module<B>,
    {
        let path = save_module::<B, M>(model, &self.checkpoint_path(name))?;
        info!("Saved checkpoint to {:?}", path);

        self.cleanup_old_checkpoints();
        Ok(path)
    }

    /// Load the checkpoint `name` into `model`
    pub fn load<B, M>(&self, model: M, name: &str, device: &B::Device) -> Result<M>
    where
        B: Backend,
        M: Module<B>,
    {
        load_module::<B, M>(model, &self.checkpoint_path(name), device)
    }

    /// List available checkpoints
    pub fn list_checkpoints(&self) -> Vec<String> {
        let suffix = format!(".{}", CHECKPOINT_EXTENSION);
        let mut checkpoints = Vec::new();

        if let Ok(entries) = fs::read_dir(&self.checkpoint_dir) {
            for entry in entries.flatten() {
                if let Some(name) = entry.file_name().to_str() {
                    if let Some(stem) = name.strip_suffix(&suffix) {
                        checkpoints.push(stem.to_string());
                    }
                }
            }
        }

        checkpoints.sort();
        checkpoints
    }

    /// Get latest checkpoint name
    pub fn latest_checkpoint(&self) -> Option<String> {
        self.list_checkpoints().into_iter().last()
    }

    /// Cleanup old checkpoints keeping only max_checkpoints
    fn cleanup_old_checkpoints(&self) {
        let checkpoints = self.list_checkpoints();

        if checkpoints.len() <= self.max_checkpoints {
            return;
        }

        let to_remove = checkpoints.len() - self.max_checkpoints;
        for name in checkpoints.into_iter().take(to_remove) {
            let path = self.checkpoint_path(&name);
            if let Err(e) = fs::remove_file(&path) {
                warn!("Failed to remove old checkpoint {:?}: {}", path, e);
            } else {
                debug!("Removed old checkpoint: {}", name);
            }
        }
    }

    /// Check if a checkpoint exists
    pub fn exists(&self, name: &str) -> bool {
        self.checkpoint_path(name).exists()
    }
}

/// Generate a checkpoint name with timestamp
pub fn timestamped_name(prefix: &str) -> String {
    let now = chrono::Utc::now();
    format!("{}_{}", prefix, now.format("%Y%m%d_%H%M%S"))
}

/// Generate a checkpoint name with a zero-padded counter so names sort in order
pub fn cycle_name(prefix: &str, cycle: usize) -> String {
    format!("{}_{:08}", prefix, cycle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rl::networks::QNetworkConfig;
    use burn_ndarray::NdArray;
    use std::env::temp_dir;

    type TestBackend = NdArray<f32>;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = temp_dir().join(format!("spotbot_{}_{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn test_checkpoint_path() {
        let checkpointer = Checkpointer::new(scratch_dir("ckpt_path"), 5);
        let path = checkpointer.checkpoint_path("model_v1");

        assert!(path.to_string_lossy().ends_with("model_v1.mpk"));
    }

    #[test]
    fn test_timestamped_name() {
        let name = timestamped_name("dqn");
        assert!(name.starts_with("dqn_"));
        assert!(name.len() > 10);
    }

    #[test]
    fn test_cycle_name_sorts() {
        assert_eq!(cycle_name("dqn", 100), "dqn_00000100");
        assert!(cycle_name("dqn", 9) < cycle_name("dqn", 10));
    }

    #[test]
    fn test_load_missing_file_fails() {
        let device = Default::default();
        let model = QNetworkConfig::default().init::<TestBackend>(&device);
        let path = scratch_dir("missing").join("nothing");

        let result = load_module::<TestBackend, _>(model, &path, &device);
        assert!(matches!(result, Err(SpotbotError::Checkpoint(_))));
    }

    #[test]
    fn test_rotation_keeps_newest() {
        let dir = scratch_dir("rotation");
        let checkpointer = Checkpointer::new(&dir, 2);
        let device = Default::default();
        let model = QNetworkConfig::with_hidden(8).init::<TestBackend>(&device);

        for cycle in 1..=3 {
            checkpointer
                .save::<TestBackend, _>(&model, &cycle_name("dqn", cycle))
                .unwrap();
        }

        assert_eq!(
            checkpointer.list_checkpoints(),
            vec![cycle_name("dqn", 2), cycle_name("dqn", 3)]
        );
        assert_eq!(checkpointer.latest_checkpoint(), Some(cycle_name("dqn", 3)));

        let _ = fs::remove_dir_all(&dir);
    }
}
