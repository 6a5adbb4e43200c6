// SPDX-License-Identifier: MIT OR Apache-2.0
//! The frame loop driving every loaded graph.

use crate::capture;
use crate::settings::{HostSettings, PipelineSource};
use anyhow::{bail, Context};
use spectra_graph::{passes, pipelines, FrameControl, GraphDesc, GraphManager, HostError};
use std::path::PathBuf;
use std::time::Duration;

/// Totals of one host run
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Frames that completed
    pub rendered: u64,
    /// Frames that aborted
    pub failed: u64,
    /// Written capture files
    pub captured: Vec<PathBuf>,
}

/// Loads pipelines into a [`GraphManager`] and renders frames
#[derive(Debug)]
pub struct Host {
    manager: GraphManager,
    settings: HostSettings,
}

impl Host {
    /// Create a host with the standard stage types and the configured pipelines
    pub fn new(settings: HostSettings) -> anyhow::Result<Self> {
        let registry = passes::standard_registry().context("Failed to register standard passes")?;
        let mut manager = GraphManager::new(registry);
        *manager.capture_mut() = settings.capture();

        for source in &settings.pipelines {
            let desc = load_pipeline(source)?;
            let name = desc.name.clone();
            let graph = desc
                .build(manager.registry())
                .with_context(|| format!("Failed to build pipeline '{name}'"))?;
            manager
                .add_graph(graph)
                .with_context(|| format!("Failed to register pipeline '{name}'"))?;
            tracing::info!(graph = %name, "Loaded pipeline");
        }

        Ok(Self { manager, settings })
    }

    /// The underlying graph manager
    pub fn manager(&self) -> &GraphManager {
        &self.manager
    }

    /// Render the configured number of frames.
    ///
    /// With `only` set, just that graph runs. Failed frames are logged and
    /// counted; the loop moves on to the next frame.
    pub fn run(&mut self, only: Option<&str>) -> anyhow::Result<RunSummary> {
        let graphs: Vec<String> = match only {
            Some(name) if !self.manager.contains(name) => bail!("Unknown graph '{name}'"),
            Some(name) => vec![name.to_string()],
            None => self.manager.graph_names().map(str::to_string).collect(),
        };

        let mut summary = RunSummary::default();
        for index in 0..self.settings.frames {
            for graph in &graphs {
                let control = self.frame_control();
                match self
                    .manager
                    .execute(graph, self.settings.width, self.settings.height, &control)
                {
                    Ok(frame) => {
                        summary.rendered += 1;
                        if self.settings.captures_frame(index) {
                            let written = capture::capture_frame(&frame, self.manager.capture())?;
                            summary.captured.extend(written);
                        }
                    }
                    Err(HostError::Frame(failure)) => {
                        summary.failed += 1;
                        tracing::warn!(
                            graph = %graph,
                            executed = ?failure.partial.executed_stages(),
                            "Frame {index} aborted: {}",
                            failure.error
                        );
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }

        tracing::info!(
            rendered = summary.rendered,
            failed = summary.failed,
            captured = summary.captured.len(),
            "Run complete"
        );
        Ok(summary)
    }

    fn frame_control(&self) -> FrameControl {
        match self.settings.frame_budget_ms {
            0 => FrameControl::new(),
            ms => FrameControl::new().with_timeout(Duration::from_millis(ms)),
        }
    }
}

fn load_pipeline(source: &PipelineSource) -> anyhow::Result<GraphDesc> {
    match source {
        PipelineSource::Builtin(name) => {
            pipelines::builtin(name).with_context(|| format!("Failed to load built-in pipeline '{name}'"))
        }
        PipelineSource::File(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            GraphDesc::from_ron(&content).with_context(|| format!("Failed to parse {}", path.display()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(dir: &std::path::Path) -> HostSettings {
        HostSettings {
            frames: 2,
            width: 4,
            height: 4,
            output_dir: dir.to_path_buf(),
            capture_every: 1,
            ..HostSettings::default()
        }
    }

    #[test]
    fn test_run_renders_and_captures() {
        let dir = tempfile::tempdir().unwrap();
        let mut host = Host::new(settings(dir.path())).unwrap();
        assert_eq!(host.manager().len(), 2);

        let summary = host.run(Some("TinySpectralPathTracer")).unwrap();
        assert_eq!(summary.rendered, 2);
        assert_eq!(summary.failed, 0);
        assert_eq!(
            summary.captured,
            [
                dir.path().join("spectra.TinySpectralPathTracer.0.ToneMapper.dst.png"),
                dir.path().join("spectra.TinySpectralPathTracer.1.ToneMapper.dst.png"),
            ]
        );
        assert!(summary.captured.iter().all(|p| p.exists()));
    }

    #[test]
    fn test_pipeline_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut desc = pipelines::builtin("TinySpectralPathTracer").unwrap();
        desc.name = "FromFile".to_string();
        let path = dir.path().join("graph.ron");
        std::fs::write(&path, desc.to_ron().unwrap()).unwrap();

        let mut host = Host::new(HostSettings {
            pipelines: vec![PipelineSource::File(path)],
            capture_every: 0,
            ..settings(dir.path())
        })
        .unwrap();
        let summary = host.run(None).unwrap();
        assert_eq!(summary.rendered, 2);
        assert_eq!(summary.captured.len(), 1);
    }

    #[test]
    fn test_setup_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = Host::new(HostSettings {
            pipelines: vec![PipelineSource::Builtin("Nope".to_string())],
            ..settings(dir.path())
        });
        assert!(missing.is_err());

        let duplicate = Host::new(HostSettings {
            pipelines: vec![
                PipelineSource::Builtin("ReSTIRPLTPT".to_string()),
                PipelineSource::Builtin("ReSTIRPLTPT".to_string()),
            ],
            ..settings(dir.path())
        });
        assert!(duplicate.is_err());

        let mut host = Host::new(settings(dir.path())).unwrap();
        assert!(host.run(Some("Nope")).is_err());
    }
}
