//! Persistentie van cutting planes en groom-resultaten per run-directory.
//!
//! De toestand wordt als geversioneerd XML-record weggeschreven zodat een
//! latere run met `--skip-grooming` de gekozen planes en de gegroomde
//! distance transforms terugvindt.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use quick_xml::de::from_str;
use quick_xml::se::to_string;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{CuttingPlane, PlaneError};
use crate::geom::Point3;

/// Huidige schemaversie van het run-record.
pub const RUN_STATE_VERSION: u32 = 1;

/// Relatief pad van het run-record binnen een run-directory.
pub const RUN_STATE_FILE: &str = "groomed/run_state.xml";

/// Fouten bij het lezen of schrijven van het run-record.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Er is nog nooit een record voor deze run opgeslagen.
    #[error("no saved run state at {}", path.display())]
    NotFound { path: PathBuf },
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed run state: {0}")]
    Xml(#[from] quick_xml::DeError),
    #[error("run state version {found} is not supported (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },
    #[error("run state holds an invalid plane: {0}")]
    Plane(#[from] PlaneError),
}

/// Groomed distance transform of a single subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroomedSubject {
    pub id: String,
    pub distance_transform: PathBuf,
}

/// Persisted outcome of a full grooming pass.
#[derive(Debug, Clone, PartialEq)]
pub struct RunState {
    pub planes: Vec<CuttingPlane>,
    pub groomed_dir: PathBuf,
    pub subjects: Vec<GroomedSubject>,
    pub created_unix: i64,
}

impl RunState {
    #[must_use]
    pub fn new(planes: Vec<CuttingPlane>, groomed_dir: PathBuf, subjects: Vec<GroomedSubject>) -> Self {
        Self {
            planes,
            groomed_dir,
            subjects,
            created_unix: time::OffsetDateTime::now_utc().unix_timestamp(),
        }
    }

    #[must_use]
    pub fn distance_transform_for(&self, subject_id: &str) -> Option<&Path> {
        self.subjects
            .iter()
            .find(|subject| subject.id == subject_id)
            .map(|subject| subject.distance_transform.as_path())
    }
}

/// Run-scoped storage for cutting planes; the only state that outlives a
/// single pipeline invocation.
#[derive(Debug, Clone, Copy, Default)]
pub struct CuttingPlaneStore;

impl CuttingPlaneStore {
    #[must_use]
    pub fn state_path(run_dir: &Path) -> PathBuf {
        run_dir.join(RUN_STATE_FILE)
    }

    /// Saves only a plane list, replacing any earlier record for the run.
    pub fn save(run_dir: &Path, planes: &[CuttingPlane]) -> Result<(), StoreError> {
        let state = RunState::new(planes.to_vec(), run_dir.join("groomed"), Vec::new());
        Self::save_state(run_dir, &state)
    }

    pub fn load(run_dir: &Path) -> Result<Vec<CuttingPlane>, StoreError> {
        Self::load_state(run_dir).map(|state| state.planes)
    }

    pub fn save_state(run_dir: &Path, state: &RunState) -> Result<(), StoreError> {
        let path = Self::state_path(run_dir);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let body = to_string(&RunStateDocument::from(state))?;
        let xml = format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n{body}\n");

        let tmp = path.with_extension("xml.tmp");
        fs::write(&tmp, xml).map_err(|source| StoreError::Io {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, &path).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;

        log::debug!(
            "saved run state with {} plane(s) and {} subject(s) to {}",
            state.planes.len(),
            state.subjects.len(),
            path.display()
        );
        Ok(())
    }

    pub fn load_state(run_dir: &Path) -> Result<RunState, StoreError> {
        let path = Self::state_path(run_dir);
        let xml = match fs::read_to_string(&path) {
            Ok(xml) => xml,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound { path });
            }
            Err(source) => return Err(StoreError::Io { path, source }),
        };

        let document: RunStateDocument = from_str(strip_xml_preamble(&xml))?;
        if document.version != RUN_STATE_VERSION {
            return Err(StoreError::UnsupportedVersion {
                found: document.version,
                expected: RUN_STATE_VERSION,
            });
        }
        document.into_state()
    }
}

fn strip_xml_preamble(input: &str) -> &str {
    let trimmed = input.trim_start_matches(|c: char| c == '\u{feff}' || c.is_whitespace());
    if let Some(rest) = trimmed.strip_prefix("<?xml") {
        if let Some(idx) = rest.find("?>") {
            return rest[idx + 2..].trim_start();
        }
    }
    trimmed
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename = "run_state")]
struct RunStateDocument {
    #[serde(rename = "@version")]
    version: u32,
    #[serde(rename = "@created_unix", default)]
    created_unix: i64,
    groomed_dir: String,
    #[serde(rename = "plane", default)]
    planes: Vec<PlaneRecord>,
    #[serde(rename = "subject", default)]
    subjects: Vec<SubjectRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PlaneRecord {
    #[serde(rename = "point", default)]
    points: Vec<PointRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PointRecord {
    #[serde(rename = "@x")]
    x: f64,
    #[serde(rename = "@y")]
    y: f64,
    #[serde(rename = "@z")]
    z: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct SubjectRecord {
    #[serde(rename = "@id")]
    id: String,
    #[serde(rename = "$text")]
    distance_transform: String,
}

impl From<&RunState> for RunStateDocument {
    fn from(state: &RunState) -> Self {
        Self {
            version: RUN_STATE_VERSION,
            created_unix: state.created_unix,
            groomed_dir: state.groomed_dir.to_string_lossy().into_owned(),
            planes: state
                .planes
                .iter()
                .map(|plane| PlaneRecord {
                    points: plane
                        .points()
                        .iter()
                        .map(|p| PointRecord {
                            x: p.x,
                            y: p.y,
                            z: p.z,
                        })
                        .collect(),
                })
                .collect(),
            subjects: state
                .subjects
                .iter()
                .map(|subject| SubjectRecord {
                    id: subject.id.clone(),
                    distance_transform: subject.distance_transform.to_string_lossy().into_owned(),
                })
                .collect(),
        }
    }
}

impl RunStateDocument {
    fn into_state(self) -> Result<RunState, StoreError> {
        let planes = self
            .planes
            .into_iter()
            .map(|record| {
                let points: Vec<Point3> = record
                    .points
                    .into_iter()
                    .map(|p| Point3::new(p.x, p.y, p.z))
                    .collect();
                CuttingPlane::from_slice(&points)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(RunState {
            planes,
            groomed_dir: PathBuf::from(self.groomed_dir),
            subjects: self
                .subjects
                .into_iter()
                .map(|record| GroomedSubject {
                    id: record.id,
                    distance_transform: PathBuf::from(record.distance_transform),
                })
                .collect(),
            created_unix: self.created_unix,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn femur_plane() -> CuttingPlane {
        CuttingPlane::from_arrays([[-1.0, -1.0, -40.5], [1.0, -1.0, -40.5], [-1.0, 1.0, -40.5]])
    }

    #[test]
    fn load_without_save_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = CuttingPlaneStore::load(dir.path()).unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[test]
    fn planes_survive_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let second = CuttingPlane::from_arrays([
            [10.0, -3.0, 10.0],
            [-10.0, -3.0, 10.0],
            [10.0, -3.0, -10.0],
        ]);
        let planes = vec![femur_plane(), second];

        CuttingPlaneStore::save(dir.path(), &planes).unwrap();
        assert_eq!(CuttingPlaneStore::load(dir.path()).unwrap(), planes);
    }

    #[test]
    fn save_overwrites_previous_record() {
        let dir = tempfile::tempdir().unwrap();
        CuttingPlaneStore::save(dir.path(), &[femur_plane(), femur_plane()]).unwrap();
        let replacement = femur_plane().normalize_orientation(crate::geom::Axis::Z);
        CuttingPlaneStore::save(dir.path(), &[replacement]).unwrap();

        assert_eq!(CuttingPlaneStore::load(dir.path()).unwrap(), vec![replacement]);
        assert!(!CuttingPlaneStore::state_path(dir.path())
            .with_extension("xml.tmp")
            .exists());
    }

    #[test]
    fn full_state_round_trips_subjects() {
        let dir = tempfile::tempdir().unwrap();
        let groomed = dir.path().join("groomed");
        let state = RunState::new(
            vec![femur_plane()],
            groomed.clone(),
            vec![
                GroomedSubject {
                    id: "m03_L_femur".to_owned(),
                    distance_transform: groomed.join("m03_L_femur.DT.nrrd"),
                },
                GroomedSubject {
                    id: "m04_R_femur".to_owned(),
                    distance_transform: groomed.join("m04_R_femur.DT.nrrd"),
                },
            ],
        );

        CuttingPlaneStore::save_state(dir.path(), &state).unwrap();
        let loaded = CuttingPlaneStore::load_state(dir.path()).unwrap();
        assert_eq!(loaded, state);
        assert_eq!(
            loaded.distance_transform_for("m04_R_femur"),
            Some(groomed.join("m04_R_femur.DT.nrrd").as_path())
        );
        assert_eq!(loaded.distance_transform_for("m05_L_femur"), None);
    }

    #[test]
    fn unknown_version_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = CuttingPlaneStore::state_path(dir.path());
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(
            &path,
            "<run_state version=\"99\" created_unix=\"0\"><groomed_dir>g</groomed_dir></run_state>",
        )
        .unwrap();

        let err = CuttingPlaneStore::load_state(dir.path()).unwrap_err();
        assert!(matches!(
            err,
            StoreError::UnsupportedVersion { found: 99, expected: RUN_STATE_VERSION }
        ));
    }

    #[test]
    fn plane_with_wrong_point_count_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = CuttingPlaneStore::state_path(dir.path());
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(
            &path,
            "<run_state version=\"1\"><groomed_dir>g</groomed_dir>\
             <plane><point x=\"0\" y=\"0\" z=\"0\"/><point x=\"1\" y=\"0\" z=\"0\"/></plane>\
             </run_state>",
        )
        .unwrap();

        let err = CuttingPlaneStore::load(dir.path()).unwrap_err();
        assert!(matches!(err, StoreError::Plane(PlaneError::PointCount(2))));
    }
}
