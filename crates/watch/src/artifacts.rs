//! Writes a finished session's records to the output directory.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use chrono::Local;
use eyesis_client::api::DetectorApi;
use eyesis_core::clip::Clip;
use eyesis_core::error::CoreError;
use eyesis_core::export::{clip_filename, decode_data_url, log_filename, snapshot_filename, write_log_csv};
use eyesis_core::session::SessionContext;

pub const CLIP_MANIFEST: &str = "clips.json";

#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Failed to write clip manifest: {0}")]
    Json(#[from] serde_json::Error),
}

/// Files written by [`ArtifactWriter::write_session`].
#[derive(Debug, Default)]
pub struct ArtifactSummary {
    pub snapshots: Vec<PathBuf>,
    pub log: Option<PathBuf>,
    pub manifest: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    out_dir: PathBuf,
}

impl ArtifactWriter {
    /// Create the writer, creating `out_dir` if needed.
    pub fn new(out_dir: impl Into<PathBuf>) -> Result<Self, ArtifactError> {
        let out_dir = out_dir.into();
        std::fs::create_dir_all(&out_dir).map_err(|source| ArtifactError::Io {
            path: out_dir.clone(),
            source,
        })?;
        Ok(Self { out_dir })
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    /// Snapshots, the detection log and the clip manifest.
    pub fn write_session(&self, session: &SessionContext) -> Result<ArtifactSummary, ArtifactError> {
        let snapshots = self.write_snapshots(session)?;
        let log = self.write_log(session)?;
        let manifest = self.write_clip_manifest(&session.clips().all())?;
        Ok(ArtifactSummary {
            snapshots,
            log,
            manifest: Some(manifest),
        })
    }

    /// Decode every snapshot image into its own file. A snapshot whose image
    /// cannot be decoded or written is skipped, so one bad still never holds
    /// back the log and the manifest.
    pub fn write_snapshots(&self, session: &SessionContext) -> Result<Vec<PathBuf>, ArtifactError> {
        let mut written = Vec::new();
        for (position, snapshot) in session.snapshots().all().iter().enumerate() {
            let bytes = match decode_data_url(&snapshot.image_encoding) {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::warn!(snapshot_id = snapshot.id, error = %e, "Skipping snapshot with unreadable image");
                    continue;
                }
            };
            let path = self.out_dir.join(snapshot_filename(position, snapshot));
            if let Err(e) = self.write_file(&path, &bytes) {
                tracing::warn!(snapshot_id = snapshot.id, error = %e, "Skipping snapshot that could not be written");
                continue;
            }
            written.push(path);
        }
        Ok(written)
    }

    /// The detection log as CSV. Nothing is written for an empty log.
    pub fn write_log(&self, session: &SessionContext) -> Result<Option<PathBuf>, ArtifactError> {
        if session.log().is_empty() {
            return Ok(None);
        }
        let path = self.out_dir.join(log_filename(Local::now().naive_local()));
        let file = File::create(&path).map_err(|source| ArtifactError::Io {
            path: path.clone(),
            source,
        })?;
        write_log_csv(BufWriter::new(file), session.log().entries())?;
        Ok(Some(path))
    }

    pub fn write_clip_manifest(&self, clips: &[Clip]) -> Result<PathBuf, ArtifactError> {
        let path = self.out_dir.join(CLIP_MANIFEST);
        let json = serde_json::to_vec_pretty(clips)?;
        self.write_file(&path, &json)?;
        Ok(path)
    }

    /// Have the backend cut each closed clip out of `video_path`.
    ///
    /// A failed extraction is logged and the remaining clips still run.
    pub async fn extract_clips(
        &self,
        api: &DetectorApi,
        video_path: &Path,
        clips: &[Clip],
    ) -> Result<Vec<PathBuf>, ArtifactError> {
        let closed: Vec<&Clip> = clips.iter().filter(|c| !c.is_open()).collect();
        if closed.is_empty() {
            return Ok(Vec::new());
        }

        let video = tokio::fs::read(video_path)
            .await
            .map_err(|source| ArtifactError::Io {
                path: video_path.to_path_buf(),
                source,
            })?;
        let file_name = video_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "video.mp4".to_string());

        let mut written = Vec::new();
        for clip in closed {
            let bytes = match api.extract_clip(video.clone(), &file_name, clip).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::warn!(clip_id = clip.id, person_id = %clip.person_id, error = %e, "Clip extraction failed");
                    continue;
                }
            };
            let path = self.out_dir.join(clip_filename(clip)?);
            self.write_file(&path, &bytes)?;
            written.push(path);
        }
        Ok(written)
    }

    // ---- private helpers ----

    fn write_file(&self, path: &Path, bytes: &[u8]) -> Result<(), ArtifactError> {
        std::fs::write(path, bytes).map_err(|source| ArtifactError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}
