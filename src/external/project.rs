//! Project file and launcher for the shape model viewer.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use quick_xml::Writer;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};

use crate::manifest::FileManifest;
use crate::pipeline::collaborators::{AnalysisLauncher, ToolError, ToolResult};

/// Name of the project file written next to the correspondence files.
pub const PROJECT_FILE: &str = "analyze.xml";

/// Renders the viewer's project document.
///
/// All three lists must have one entry per subject.
pub fn render_project(
    distance_transforms: &FileManifest,
    local: &FileManifest,
    world: &FileManifest,
) -> ToolResult<String> {
    if distance_transforms.len() != local.len() {
        return Err(ToolError::BadOutput {
            step: "project",
            detail: format!(
                "{} distance transform(s) but {} particle file(s)",
                distance_transforms.len(),
                local.len()
            ),
        });
    }
    if local.len() != world.len() {
        return Err(ToolError::BadOutput {
            step: "project",
            detail: format!("{} local but {} world particle file(s)", local.len(), world.len()),
        });
    }

    let mut writer = Writer::new(Vec::new());
    for (tag, files) in [
        ("distance_transform_files", distance_transforms),
        ("local_point_files", local),
        ("world_point_files", world),
    ] {
        write_list(&mut writer, tag, files).map_err(xml_error)?;
    }
    String::from_utf8(writer.into_inner()).map_err(|err| ToolError::BadOutput {
        step: "project",
        detail: err.to_string(),
    })
}

fn write_list(writer: &mut Writer<Vec<u8>>, tag: &str, files: &FileManifest) -> Result<(), quick_xml::Error> {
    let listing = files
        .iter()
        .map(|path| path.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("\n");
    writer.write_event(Event::Start(BytesStart::new(tag)))?;
    writer.write_event(Event::Text(BytesText::new(&format!("\n{listing}\n"))))?;
    writer.write_event(Event::End(BytesEnd::new(tag)))?;
    writer.write_event(Event::Text(BytesText::new("\n")))?;
    Ok(())
}

fn xml_error(err: quick_xml::Error) -> ToolError {
    ToolError::BadOutput {
        step: "project",
        detail: err.to_string(),
    }
}

/// Writes a project file and starts the viewer on it without waiting.
#[derive(Debug, Clone)]
pub struct StudioLauncher {
    viewer: PathBuf,
}

impl StudioLauncher {
    pub fn new(viewer: impl Into<PathBuf>) -> Self {
        Self { viewer: viewer.into() }
    }

    /// Writes `<out_dir>/analyze.xml` and returns its path.
    pub fn write_project(
        out_dir: &Path,
        distance_transforms: &FileManifest,
        local: &FileManifest,
        world: &FileManifest,
    ) -> ToolResult<PathBuf> {
        let xml = render_project(distance_transforms, local, world)?;
        let path = out_dir.join(PROJECT_FILE);
        fs::create_dir_all(out_dir)
            .and_then(|()| fs::write(&path, xml))
            .map_err(|source| ToolError::Io {
                path: path.clone(),
                source,
            })?;
        Ok(path)
    }
}

impl AnalysisLauncher for StudioLauncher {
    fn launch(
        &self,
        out_dir: &Path,
        dt_files: &FileManifest,
        local: &FileManifest,
        world: &FileManifest,
    ) -> ToolResult<()> {
        let project = Self::write_project(out_dir, dt_files, local, world)?;
        // The viewer outlives the run: it gets no console input and its
        // handle is dropped without waiting on it.
        let child = Command::new(&self.viewer)
            .arg(&project)
            .stdin(Stdio::null())
            .spawn()
            .map_err(|source| ToolError::Spawn {
                program: self.viewer.display().to_string(),
                source,
            })?;
        log::info!(
            "started {} (pid {}) on {}",
            self.viewer.display(),
            child.id(),
            project.display()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files(names: &[&str]) -> FileManifest {
        names.iter().map(PathBuf::from).collect()
    }

    #[test]
    fn project_lists_each_file_set() {
        let xml = render_project(
            &files(&["a.DT.nrrd", "b.DT.nrrd"]),
            &files(&["a_local.particles", "b_local.particles"]),
            &files(&["a_world.particles", "b_world.particles"]),
        )
        .unwrap();
        assert!(xml.contains("<distance_transform_files>\na.DT.nrrd\nb.DT.nrrd\n</distance_transform_files>"));
        assert!(xml.contains("<local_point_files>\na_local.particles\nb_local.particles\n</local_point_files>"));
        assert!(xml.contains("<world_point_files>"));
    }

    #[test]
    fn mismatched_lists_are_refused() {
        let err = render_project(&files(&["a", "b"]), &files(&["a"]), &files(&["a"])).unwrap_err();
        assert!(matches!(err, ToolError::BadOutput { step: "project", .. }));
        let err = render_project(&files(&["a"]), &files(&["a"]), &files(&[])).unwrap_err();
        assert!(err.to_string().contains("world"));
    }

    #[test]
    fn project_is_written_to_the_model_dir() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("shape_models");
        let path = StudioLauncher::write_project(&out, &files(&["a"]), &files(&["l"]), &files(&["w"])).unwrap();
        assert_eq!(path, out.join(PROJECT_FILE));
        assert!(fs::read_to_string(path).unwrap().contains("<local_point_files>\nl\n</local_point_files>"));
    }

    #[cfg(unix)]
    #[test]
    fn launch_returns_without_waiting_on_the_viewer() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = StudioLauncher::new("true");
        launcher
            .launch(dir.path(), &files(&["a"]), &files(&["l"]), &files(&["w"]))
            .unwrap();
        assert!(dir.path().join(PROJECT_FILE).is_file());
    }

    #[test]
    fn missing_viewer_is_a_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = StudioLauncher::new(dir.path().join("no-such-viewer"));
        let err = launcher
            .launch(dir.path(), &files(&["a"]), &files(&["l"]), &files(&["w"]))
            .unwrap_err();
        assert!(matches!(err, ToolError::Spawn { .. }));
    }
}
