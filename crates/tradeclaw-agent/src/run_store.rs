//! Run store: one JSON document per run at `<state_dir>/runs/<runId>.json`

use std::path::{Path, PathBuf};
use tracing::warn;
use tradeclaw_core::{validate_run_id, Error, Result, RunPatch, RunRecord};

pub struct RunStore {
    dir: PathBuf,
}

impl RunStore {
    pub fn new(state_dir: impl AsRef<Path>) -> Self {
        Self {
            dir: state_dir.as_ref().join("runs"),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, run_id: &str) -> Result<PathBuf> {
        validate_run_id(run_id)?;
        Ok(self.dir.join(format!("{}.json", run_id)))
    }

    /// Persist the whole record, replacing any previous version.
    /// Written to a temp file first so readers never see a torn document.
    pub async fn write(&self, record: &RunRecord) -> Result<()> {
        let path = self.path(&record.run_id)?;
        tokio::fs::create_dir_all(&self.dir).await?;

        let tmp = self
            .dir
            .join(format!(".{}.{}.tmp", record.run_id, uuid::Uuid::new_v4().simple()));
        let body = serde_json::to_vec_pretty(record)?;
        tokio::fs::write(&tmp, body).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    pub async fn get(&self, run_id: &str) -> Result<Option<RunRecord>> {
        let path = self.path(run_id)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Read-modify-write. A missing record is patched onto a bare shell.
    ///
    /// Not safe for concurrent writers of the same run; each run has exactly
    /// one writer, the executor that owns it.
    pub async fn update(&self, run_id: &str, patch: RunPatch) -> Result<RunRecord> {
        let mut record = match self.get(run_id).await? {
            Some(r) => r,
            None => {
                warn!(run_id = %run_id, "patching a run with no stored record");
                RunRecord::shell(run_id)
            }
        };

        if let Some(next) = patch.status {
            if next != record.status && !record.status.can_transition_to(next) {
                return Err(Error::Internal(format!(
                    "run {} cannot move from {} to {}",
                    run_id, record.status, next
                )));
            }
        }

        record.apply(patch);
        self.write(&record).await?;
        Ok(record)
    }
}
