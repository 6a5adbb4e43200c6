// SPDX-License-Identifier: MIT OR Apache-2.0
//! Host settings, stored as RON.

use serde::{Deserialize, Serialize};
use spectra_graph::CaptureSettings;
use std::path::{Path, PathBuf};

/// Current settings file format version
pub const SETTINGS_FORMAT_VERSION: u32 = 1;

/// Where a pipeline's graph description comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineSource {
    /// A pipeline shipped with the engine, by graph name
    Builtin(String),
    /// A RON graph description on disk
    File(PathBuf),
}

/// Settings of one host run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostSettings {
    /// Settings format version
    pub version: u32,
    /// Frames to render per graph
    pub frames: u64,
    /// Output width in pixels
    pub width: u32,
    /// Output height in pixels
    pub height: u32,
    /// Capture directory
    pub output_dir: PathBuf,
    /// Capture file name prefix
    pub base_filename: String,
    /// Per-graph capture directories
    pub graph_output_dirs: Vec<(String, PathBuf)>,
    /// Pipelines to load, in registration order
    pub pipelines: Vec<PipelineSource>,
    /// Capture every n-th frame; 0 captures only the last frame
    pub capture_every: u64,
    /// Per-frame time budget in milliseconds, 0 for none
    pub frame_budget_ms: u64,
    /// Log filter used when `RUST_LOG` is not set
    pub log_filter: String,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            version: SETTINGS_FORMAT_VERSION,
            frames: 16,
            width: 256,
            height: 256,
            output_dir: PathBuf::from("captures"),
            base_filename: "spectra".to_string(),
            graph_output_dirs: Vec::new(),
            pipelines: vec![
                PipelineSource::Builtin("ReSTIRPLTPT".to_string()),
                PipelineSource::Builtin("TinySpectralPathTracer".to_string()),
            ],
            capture_every: 0,
            frame_budget_ms: 0,
            log_filter: "spectra=info,spectra_graph=info".to_string(),
        }
    }
}

impl HostSettings {
    /// Load settings from a file
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let settings: HostSettings = ron::from_str(&content)?;

        if settings.version > SETTINGS_FORMAT_VERSION {
            return Err(SettingsError::UnsupportedVersion {
                found: settings.version,
                supported: SETTINGS_FORMAT_VERSION,
            });
        }
        Ok(settings)
    }

    /// Save settings to a file
    pub fn save(&self, path: &Path) -> Result<(), SettingsError> {
        let config = ron::ser::PrettyConfig::default()
            .struct_names(true)
            .enumerate_arrays(false);
        let content = ron::ser::to_string_pretty(self, config)?;
        std::fs::write(path, content).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Capture settings for the graph manager
    pub fn capture(&self) -> CaptureSettings {
        let mut capture = CaptureSettings::new(&self.output_dir);
        capture.base_filename.clone_from(&self.base_filename);
        capture
            .overrides
            .extend(self.graph_output_dirs.iter().cloned());
        capture
    }

    /// Whether frame `index` of a run is captured
    pub fn captures_frame(&self, index: u64) -> bool {
        let last = index + 1 == self.frames;
        match self.capture_every {
            0 => last,
            n => last || (index + 1) % n == 0,
        }
    }
}

/// Error reading or writing a settings file
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    /// Reading or writing failed
    #[error("{}: {source}", .path.display())]
    Io {
        /// Settings file
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// The file is not valid settings RON
    #[error("Invalid settings: {0}")]
    Parse(#[from] ron::error::SpannedError),

    /// Serialization failed
    #[error("Cannot serialize settings: {0}")]
    Serialize(#[from] ron::Error),

    /// The file was written by a newer host
    #[error("Settings version {found} is newer than supported version {supported}")]
    UnsupportedVersion {
        /// Version in the file
        found: u32,
        /// Newest supported version
        supported: u32,
    },
}
