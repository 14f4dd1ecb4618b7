use crate::error::TrainingResult;
use std::path::{Path, PathBuf};

/// Filesystem layout of one job's output directory.
///
/// ```text
/// <output_dir>/                      adapter weights + adapter config
/// <output_dir>/adaptation_config.json
/// <output_dir>/training_manifest.json
/// <output_dir>/merged/               base model with the adapter folded in
/// ```
#[derive(Debug, Clone)]
pub struct TrainingLayout {
    root: PathBuf,
}

impl TrainingLayout {
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn adapter_dir(&self) -> PathBuf {
        self.root.clone()
    }

    #[must_use]
    pub fn merged_dir(&self) -> PathBuf {
        self.root.join("merged")
    }

    #[must_use]
    pub fn adaptation_config_path(&self) -> PathBuf {
        self.root.join("adaptation_config.json")
    }

    #[must_use]
    pub fn manifest_path(&self) -> PathBuf {
        self.root.join("training_manifest.json")
    }

    pub fn ensure_dirs(&self) -> TrainingResult<()> {
        std::fs::create_dir_all(&self.root)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_layout_paths() {
        let temp = TempDir::new().unwrap();
        let layout = TrainingLayout::new(temp.path().join("job-1"));

        assert_eq!(layout.adapter_dir(), temp.path().join("job-1"));
        assert_eq!(layout.merged_dir(), temp.path().join("job-1").join("merged"));
        assert!(layout.manifest_path().ends_with("training_manifest.json"));

        layout.ensure_dirs().unwrap();
        assert!(layout.root().is_dir());
        assert!(!layout.merged_dir().exists());
    }
}
