// SPDX-License-Identifier: MIT OR Apache-2.0
//! Writing marked frame outputs to PNG files.

use image::{ImageFormat, Rgba, RgbaImage};
use spectra_graph::{CaptureSettings, Frame, Texture};
use std::path::{Path, PathBuf};

/// Error writing a captured image
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    /// The output directory could not be created
    #[error("Cannot create {}: {source}", .path.display())]
    Io {
        /// Directory
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// Encoding or writing the image failed
    #[error("Cannot write {}: {source}", .path.display())]
    Image {
        /// Image file
        path: PathBuf,
        /// Underlying error
        source: image::ImageError,
    },
}

fn to_byte(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Quantize a texture to 8-bit RGBA
pub fn to_rgba8(texture: &Texture) -> RgbaImage {
    RgbaImage::from_fn(texture.width, texture.height, |x, y| {
        let [r, g, b, a] = texture.pixel(x, y).unwrap_or([0.0; 4]);
        Rgba([to_byte(r), to_byte(g), to_byte(b), to_byte(a)])
    })
}

/// Write a texture as a PNG file, creating parent directories
pub fn save_png(texture: &Texture, path: &Path) -> Result<(), CaptureError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|source| CaptureError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    to_rgba8(texture)
        .save_with_format(path, ImageFormat::Png)
        .map_err(|source| CaptureError::Image {
            path: path.to_path_buf(),
            source,
        })
}

/// Write every marked texture output of `frame`.
///
/// Returns the written paths. Marked outputs that are not textures are
/// skipped.
pub fn capture_frame(frame: &Frame, settings: &CaptureSettings) -> Result<Vec<PathBuf>, CaptureError> {
    let mut written = Vec::new();
    for (port, resource) in frame.marked_outputs() {
        let Some(texture) = resource.as_texture() else {
            tracing::debug!(graph = %frame.graph(), %port, kind = resource.kind(), "Skipping non-image output");
            continue;
        };
        let path = settings.path_for(frame.graph(), frame.index(), port);
        save_png(texture, &path)?;
        tracing::debug!(path = %path.display(), "Captured output");
        written.push(path);
    }
    Ok(written)
}
