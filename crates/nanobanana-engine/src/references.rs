use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::imageops::FilterType;
use image::ImageFormat;

pub const THUMBNAIL_HEIGHT: u32 = 200;

const REFERENCE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceImage {
    pub label: String,
    pub path: PathBuf,
}

impl ReferenceImage {
    pub fn new(label: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            label: label.into(),
            path: path.into(),
        }
    }

    pub fn mime_type(&self) -> &'static str {
        mime_for_path(&self.path).unwrap_or("image/jpeg")
    }
}

/// Selectable reference images, ordered by file name.
#[derive(Debug, Clone, Default)]
pub struct ReferenceCatalog {
    entries: Vec<ReferenceImage>,
}

impl ReferenceCatalog {
    /// Every jpg/png directly inside `dir`, labelled by file stem. A missing directory is
    /// an empty catalog.
    pub fn scan(dir: &Path) -> Result<Self> {
        if !dir.exists() {
            tracing::debug!(dir = %dir.display(), "reference directory does not exist");
            return Ok(Self::default());
        }
        let mut paths = Vec::new();
        for entry in
            fs::read_dir(dir).with_context(|| format!("failed to list {}", dir.display()))?
        {
            let path = entry?.path();
            if path.is_file() && is_reference_extension(&path) {
                paths.push(path);
            }
        }
        paths.sort();
        let entries = paths
            .into_iter()
            .map(|path| {
                let label = path
                    .file_stem()
                    .map(|stem| stem.to_string_lossy().into_owned())
                    .unwrap_or_default();
                ReferenceImage::new(label, path)
            })
            .collect();
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[ReferenceImage] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ReferenceImage> {
        self.entries.get(index)
    }

    /// A zero-based index or a label, compared case-insensitively.
    pub fn find(&self, selector: &str) -> Option<&ReferenceImage> {
        let selector = selector.trim();
        if let Ok(index) = selector.parse::<usize>() {
            if let Some(found) = self.get(index) {
                return Some(found);
            }
        }
        self.entries
            .iter()
            .find(|entry| entry.label.eq_ignore_ascii_case(selector))
    }
}

fn is_reference_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| REFERENCE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// `None` when the file is missing or unreadable.
pub fn load_reference_bytes(path: &Path) -> Option<Vec<u8>> {
    match fs::read(path) {
        Ok(bytes) => Some(bytes),
        Err(err) => {
            tracing::warn!(path = %path.display(), %err, "failed to read reference image");
            None
        }
    }
}

pub fn image_dimensions(bytes: &[u8]) -> Result<(u32, u32)> {
    let decoded = image::load_from_memory(bytes).context("image decode failed")?;
    Ok((decoded.width(), decoded.height()))
}

/// Scales to `target_height` keeping the aspect ratio. The source format is kept when it
/// can be encoded again, otherwise the result is PNG.
pub fn resize_to_height(bytes: &[u8], target_height: u32) -> Result<Vec<u8>> {
    let format = image::guess_format(bytes).unwrap_or(ImageFormat::Png);
    let decoded = image::load_from_memory(bytes).context("image decode failed")?;
    let height = target_height.max(1);
    let width = ((decoded.width() as f64 * height as f64) / decoded.height().max(1) as f64)
        .round()
        .max(1.0) as u32;
    let resized = decoded.resize_exact(width, height, FilterType::Lanczos3);

    let format = match format {
        ImageFormat::Jpeg | ImageFormat::Png => format,
        _ => ImageFormat::Png,
    };
    let mut out = Cursor::new(Vec::new());
    match format {
        ImageFormat::Jpeg => resized.to_rgb8().write_to(&mut out, format),
        _ => resized.write_to(&mut out, format),
    }
    .context("image encode failed")?;
    Ok(out.into_inner())
}

pub fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        _ => None,
    }
}
