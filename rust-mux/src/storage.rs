//! On-disk staging of uploaded inputs.
//!
//! Every job owns `<uploads>/<job id>/`, holding the staged subtitle and the
//! muxed output. Fonts live in a shared cache under `<fonts>/` so a later
//! submission can reuse one by name.

use std::path::{Path, PathBuf};

use tracing::debug;
use uuid::Uuid;

use crate::domain::{JobId, SUBTITLE_FILE_NAME};
use crate::pipeline::StorageRoots;
use crate::utils::filename::{base_name, has_allowed_extension};
use crate::utils::fs;
use crate::{Error, Result};

/// Accepted subtitle extensions.
pub const SUBTITLE_EXTENSIONS: &[&str] = &["ass"];

/// Accepted font extensions.
pub const FONT_EXTENSIONS: &[&str] = &["ttf", "otf"];

/// An uploaded file held in memory.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: String,
    pub data: Vec<u8>,
}

impl UploadedFile {
    pub fn new(file_name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            file_name: file_name.into(),
            data: data.into(),
        }
    }
}

/// Where the font for a job comes from.
#[derive(Debug, Clone)]
pub enum FontSource {
    /// A new font to add to the cache.
    Upload(UploadedFile),
    /// A font cached by an earlier submission.
    Cached(String),
}

/// Inputs of a submission before staging.
#[derive(Debug, Clone)]
pub struct MuxUpload {
    pub video_url: String,
    pub subtitle: UploadedFile,
    pub font: FontSource,
    /// Display name; sanitized before use.
    pub output_name: Option<String>,
}

/// A font resolved to a file in the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedFont {
    pub name: String,
    pub path: PathBuf,
}

/// Writes uploads into the storage roots.
#[derive(Debug, Clone)]
pub struct StagingArea {
    roots: StorageRoots,
}

impl StagingArea {
    pub fn new(roots: StorageRoots) -> Self {
        Self { roots }
    }

    /// Work directory owned by `id`.
    pub fn work_dir(&self, id: &JobId) -> PathBuf {
        self.roots.uploads_dir.join(id.to_string())
    }

    /// Check an upload without touching the filesystem.
    pub fn validate(upload: &MuxUpload) -> Result<()> {
        if upload.video_url.trim().is_empty() {
            return Err(Error::validation("Missing video URL"));
        }

        if upload.subtitle.file_name.trim().is_empty() {
            return Err(Error::validation("Missing subtitle file"));
        }
        if !has_allowed_extension(&upload.subtitle.file_name, SUBTITLE_EXTENSIONS) {
            return Err(Error::validation(
                "Invalid subtitle file format. Only .ass files are supported",
            ));
        }

        match &upload.font {
            FontSource::Upload(file) => {
                if !has_allowed_extension(base_name(&file.file_name), FONT_EXTENSIONS) {
                    return Err(Error::validation(
                        "Invalid font file format. Only .ttf and .otf files are supported",
                    ));
                }
            }
            FontSource::Cached(name) => {
                validate_cached_name(name)?;
            }
        }
        Ok(())
    }

    /// Store an uploaded font in the cache or look up a cached one.
    pub async fn resolve_font(&self, source: &FontSource) -> Result<CachedFont> {
        match source {
            FontSource::Upload(file) => {
                let original = base_name(&file.file_name);
                let prefix = Uuid::new_v4().simple().to_string();
                let name = format!("{}_{}", &prefix[..8], original);
                let path = self.roots.fonts_dir.join(&name);

                fs::ensure_dir_all(&self.roots.fonts_dir).await?;
                tokio::fs::write(&path, &file.data)
                    .await
                    .map_err(|e| fs::io_error("writing font", &path, e))?;
                debug!("Cached font {}", name);

                Ok(CachedFont { name, path })
            }
            FontSource::Cached(name) => {
                validate_cached_name(name)?;
                let path = self.roots.fonts_dir.join(name);
                if !fs::is_file(&path).await {
                    return Err(Error::validation(format!(
                        "Cached font not found: {}",
                        name
                    )));
                }
                Ok(CachedFont {
                    name: name.clone(),
                    path,
                })
            }
        }
    }

    /// Create the job's work directory and write its subtitle there.
    ///
    /// Returns the work directory and the subtitle path.
    pub async fn stage_subtitle(
        &self,
        id: &JobId,
        subtitle: &UploadedFile,
    ) -> Result<(PathBuf, PathBuf)> {
        let work_dir = self.prepare_work_dir(id).await?;
        let path = work_dir.join(SUBTITLE_FILE_NAME);
        tokio::fs::write(&path, &subtitle.data)
            .await
            .map_err(|e| fs::io_error("writing subtitle", &path, e))?;
        Ok((work_dir, path))
    }

    /// Create the job's work directory.
    pub async fn prepare_work_dir(&self, id: &JobId) -> Result<PathBuf> {
        let work_dir = self.work_dir(id);
        fs::ensure_dir_all_with_op("creating job directory", &work_dir).await?;
        Ok(work_dir)
    }

    /// Delete the job's work directory.
    pub async fn discard(&self, work_dir: &Path) -> Result<()> {
        fs::remove_dir_all_if_exists(work_dir).await
    }

    /// Remove a font cached for a submission that was then rejected.
    pub async fn discard_font(&self, font: &CachedFont) -> Result<()> {
        fs::remove_file_if_exists(&font.path).await
    }
}

fn validate_cached_name(name: &str) -> Result<()> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(Error::validation("Missing font file"));
    }
    if trimmed != base_name(trimmed) || trimmed == "." || trimmed == ".." {
        return Err(Error::validation(format!("Invalid cached font name: {}", name)));
    }
    if !has_allowed_extension(trimmed, FONT_EXTENSIONS) {
        return Err(Error::validation(
            "Invalid font file format. Only .ttf and .otf files are supported",
        ));
    }
    Ok(())
}
