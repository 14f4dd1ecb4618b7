use crate::adaptation::AdaptationConfig;
use crate::error::{TrainingError, TrainingResult};
use crate::job::{DatasetSpec, TrainingHyperParams, TrainingJobId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Adapter,
    AdaptationConfig,
    MergedModel,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingArtifact {
    pub kind: ArtifactKind,
    pub path: PathBuf,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TrainingMetrics {
    pub final_loss: Option<f64>,
    pub steps: u64,
    pub total_steps: u64,
    pub merged: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingManifest {
    pub job_id: TrainingJobId,
    pub created_at: DateTime<Utc>,
    pub base_model: String,
    pub dataset: DatasetSpec,
    pub hyperparams: TrainingHyperParams,
    pub adaptation: AdaptationConfig,
    #[serde(default)]
    pub metrics: TrainingMetrics,
    pub artifacts: Vec<TrainingArtifact>,
}

impl TrainingManifest {
    pub fn write(&self, path: &Path) -> TrainingResult<()> {
        let json = serde_json::to_vec_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn read(path: &Path) -> TrainingResult<Self> {
        Ok(serde_json::from_slice(&std::fs::read(path)?)?)
    }
}

pub fn sha256_file(path: &Path) -> TrainingResult<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

/// Digest over every file below `dir`, in sorted relative-path order.
///
/// Entries listed in `exclude` (relative to `dir`) are skipped, so the
/// adapter digest does not cover `merged/` or the manifest.
pub fn sha256_dir(dir: &Path, exclude: &[&str]) -> TrainingResult<String> {
    let mut hasher = Sha256::new();
    let walker = WalkDir::new(dir).sort_by_file_name().into_iter().filter_entry(|entry| {
        entry
            .path()
            .strip_prefix(dir)
            .map_or(true, |rel| !exclude.iter().any(|ex| rel == Path::new(ex)))
    });

    for entry in walker {
        let entry = entry.map_err(|e| TrainingError::Artifact(format!("failed to walk {}: {e}", dir.display())))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry.path().strip_prefix(dir).unwrap_or(entry.path());
        hasher.update(rel.to_string_lossy().as_bytes());
        hasher.update(sha256_file(entry.path())?.as_bytes());
    }
    Ok(hex::encode(hasher.finalize()))
}

pub fn make_artifact(kind: ArtifactKind, path: PathBuf) -> TrainingResult<TrainingArtifact> {
    if !path.exists() {
        return Err(TrainingError::Artifact(format!(
            "artifact path does not exist: {}",
            path.display()
        )));
    }

    let hash = if path.is_dir() {
        let exclude: &[&str] = if kind == ArtifactKind::Adapter { &["merged", "training_manifest.json"] } else { &[] };
        sha256_dir(&path, exclude)?
    } else {
        sha256_file(&path)?
    };
    Ok(TrainingArtifact { kind, path, sha256: hash })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_digest() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("a.txt");
        std::fs::write(&path, "abc").unwrap();
        assert_eq!(
            sha256_file(&path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_dir_digest_excludes_merged() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("adapter.bin"), "weights").unwrap();
        let before = make_artifact(ArtifactKind::Adapter, temp.path().to_path_buf()).unwrap();

        std::fs::create_dir(temp.path().join("merged")).unwrap();
        std::fs::write(temp.path().join("merged").join("model.bin"), "full").unwrap();
        let after = make_artifact(ArtifactKind::Adapter, temp.path().to_path_buf()).unwrap();
        assert_eq!(before.sha256, after.sha256);

        std::fs::write(temp.path().join("adapter.bin"), "changed").unwrap();
        let changed = make_artifact(ArtifactKind::Adapter, temp.path().to_path_buf()).unwrap();
        assert_ne!(before.sha256, changed.sha256);
    }

    #[test]
    fn test_missing_artifact() {
        let temp = TempDir::new().unwrap();
        let result = make_artifact(ArtifactKind::MergedModel, temp.path().join("missing"));
        assert!(matches!(result, Err(TrainingError::Artifact(_))));
    }
}
