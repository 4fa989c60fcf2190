//! Ordered file lists that stay index-aligned across every pipeline stage.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use rand::SeedableRng;
use rand::rngs::StdRng;
use thiserror::Error;
use wildmatch::WildMatch;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("cannot list {}: {source}", dir.display())]
    Io {
        dir: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("index {index} is out of range for a manifest of {len} file(s)")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("cannot draw {requested} sample(s) from {available} file(s)")]
    SampleTooLarge { requested: usize, available: usize },
}

/// Ordered list of files; index `i` refers to the same subject in every
/// manifest derived from it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileManifest {
    files: Vec<PathBuf>,
}

impl FileManifest {
    #[must_use]
    pub fn new(files: Vec<PathBuf>) -> Self {
        Self { files }
    }

    /// Lists `dir` and keeps files whose name matches `pattern` (e.g. `*.nrrd`),
    /// sorted by file name.
    pub fn discover(dir: &Path, pattern: &str) -> Result<Self, ManifestError> {
        let matcher = WildMatch::new(pattern);
        let entries = fs::read_dir(dir).map_err(|source| ManifestError::Io {
            dir: dir.to_path_buf(),
            source,
        })?;

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| ManifestError::Io {
                dir: dir.to_path_buf(),
                source,
            })?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let matches = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| matcher.matches(name));
            if matches {
                files.push(path);
            }
        }
        files.sort();

        log::debug!(
            "discovered {} file(s) matching `{pattern}` in {}",
            files.len(),
            dir.display()
        );
        Ok(Self { files })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    #[must_use]
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Path> {
        self.files.get(index).map(PathBuf::as_path)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Path> {
        self.files.iter().map(PathBuf::as_path)
    }

    #[must_use]
    pub fn position(&self, file: &Path) -> Option<usize> {
        self.files.iter().position(|candidate| candidate == file)
    }

    /// First `count` entries.
    #[must_use]
    pub fn take(&self, count: usize) -> Self {
        Self::new(self.files.iter().take(count).cloned().collect())
    }

    /// Entries at `indices`, in the order given.
    pub fn select(&self, indices: &[usize]) -> Result<Self, ManifestError> {
        indices
            .iter()
            .map(|&index| {
                self.files
                    .get(index)
                    .cloned()
                    .ok_or(ManifestError::IndexOutOfRange {
                        index,
                        len: self.files.len(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Self::new)
    }

    /// Concatenation; `self` keeps the leading indices.
    #[must_use]
    pub fn chain(&self, other: &Self) -> Self {
        Self::new(self.files.iter().chain(other.files.iter()).cloned().collect())
    }

    #[must_use]
    pub fn subject_ids(&self) -> Vec<String> {
        self.iter().map(subject_id).collect()
    }

    #[must_use]
    pub fn subject_prefixes(&self) -> Vec<String> {
        self.iter().map(subject_prefix).collect()
    }

    /// Indices whose file name starts with `prefix`.
    ///
    /// A subject whose prefix or id equals `prefix` exactly wins over longer
    /// names that merely start with it, so `ell_1` selects `ell_1.nrrd` and
    /// not `ell_10.nrrd` as well.
    #[must_use]
    pub fn match_prefix(&self, prefix: &str) -> Vec<usize> {
        let exact = self.indices_where(|path| subject_prefix(path) == prefix || subject_id(path) == prefix);
        if !exact.is_empty() {
            return exact;
        }
        self.indices_where(|path| file_name(path).starts_with(prefix))
    }

    fn indices_where(&self, keep: impl Fn(&Path) -> bool) -> Vec<usize> {
        self.files
            .iter()
            .enumerate()
            .filter(|(_, path)| keep(path.as_path()))
            .map(|(index, _)| index)
            .collect()
    }
}

impl<'a> IntoIterator for &'a FileManifest {
    type Item = &'a PathBuf;
    type IntoIter = std::slice::Iter<'a, PathBuf>;

    fn into_iter(self) -> Self::IntoIter {
        self.files.iter()
    }
}

impl FromIterator<PathBuf> for FileManifest {
    fn from_iter<T: IntoIterator<Item = PathBuf>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

fn file_name(path: &Path) -> &str {
    path.file_name()
        .and_then(|name| name.to_str())
        .unwrap_or_default()
}

/// File name up to the first `.`; every derived artifact keeps it.
#[must_use]
pub fn subject_id(path: &Path) -> String {
    let name = file_name(path);
    name.split('.').next().unwrap_or(name).to_owned()
}

/// First two `_`-separated parts of the file name, e.g. `m03_L`.
#[must_use]
pub fn subject_prefix(path: &Path) -> String {
    let id = subject_id(path);
    id.split('_').take(2).collect::<Vec<_>>().join("_")
}

/// Chooses which subjects of a cohort to keep.
pub trait Sampler {
    /// Returns `count` distinct indices into a manifest of `len` files, sorted.
    fn sample(&self, len: usize, count: usize) -> Result<Vec<usize>, ManifestError>;
}

/// Deterministic random subset, reproducible from its seed.
#[derive(Debug, Clone, Copy)]
pub struct SeededSampler {
    pub seed: u64,
}

impl SeededSampler {
    #[must_use]
    pub const fn new(seed: u64) -> Self {
        Self { seed }
    }
}

impl Sampler for SeededSampler {
    fn sample(&self, len: usize, count: usize) -> Result<Vec<usize>, ManifestError> {
        if count > len {
            return Err(ManifestError::SampleTooLarge {
                requested: count,
                available: len,
            });
        }
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut indices = rand::seq::index::sample(&mut rng, len, count).into_vec();
        indices.sort_unstable();
        Ok(indices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(names: &[&str]) -> FileManifest {
        names.iter().map(|name| PathBuf::from("data").join(name)).collect()
    }

    #[test]
    fn discover_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["m07_R_femur.ply", "m03_L_femur.ply", "notes.txt", "m05_L_femur.ply"] {
            fs::write(dir.path().join(name), b"").unwrap();
        }
        fs::create_dir(dir.path().join("sub.ply")).unwrap();

        let found = FileManifest::discover(dir.path(), "*.ply").unwrap();
        assert_eq!(
            found.subject_ids(),
            vec!["m03_L_femur", "m05_L_femur", "m07_R_femur"]
        );
    }

    #[test]
    fn discover_missing_dir_fails() {
        let err = FileManifest::discover(Path::new("/definitely/not/here"), "*").unwrap_err();
        assert!(matches!(err, ManifestError::Io { .. }));
    }

    #[test]
    fn subject_naming() {
        let path = Path::new("out/m03_L_femur.isores.pad.DT.nrrd");
        assert_eq!(subject_id(path), "m03_L_femur");
        assert_eq!(subject_prefix(path), "m03_L");
        assert_eq!(subject_prefix(Path::new("ellipsoid.nrrd")), "ellipsoid");
    }

    #[test]
    fn take_select_and_chain_keep_order() {
        let files = manifest(&["a.nrrd", "b.nrrd", "c.nrrd", "d.nrrd"]);
        assert_eq!(files.take(3).subject_ids(), vec!["a", "b", "c"]);
        assert_eq!(files.take(10).len(), 4);
        assert_eq!(files.select(&[3, 1]).unwrap().subject_ids(), vec!["d", "b"]);
        assert!(matches!(
            files.select(&[4]),
            Err(ManifestError::IndexOutOfRange { index: 4, len: 4 })
        ));
        let joined = files.take(1).chain(&files.select(&[2]).unwrap());
        assert_eq!(joined.subject_ids(), vec!["a", "c"]);
    }

    #[test]
    fn prefix_matching_uses_file_names() {
        let files = manifest(&["m03_L_femur.ply", "m04_R_femur.ply", "m040_L_femur.ply"]);
        assert_eq!(files.match_prefix("m03_L"), vec![0]);
        assert_eq!(files.match_prefix("m04"), vec![1, 2]);
        assert!(files.match_prefix("data").is_empty());
    }

    #[test]
    fn exact_prefix_beats_longer_names() {
        let files = manifest(&["ell_1.nrrd", "ell_10.nrrd", "ell_2.nrrd"]);
        assert_eq!(files.subject_prefixes(), vec!["ell_1", "ell_10", "ell_2"]);
        assert_eq!(files.match_prefix("ell_1"), vec![0]);
        assert_eq!(files.match_prefix("ell_10"), vec![1]);
        assert_eq!(files.match_prefix("ell_"), vec![0, 1, 2]);
    }

    #[test]
    fn seeded_sampler_is_deterministic() {
        let sampler = SeededSampler::new(42);
        let first = sampler.sample(20, 5).unwrap();
        assert_eq!(first, sampler.sample(20, 5).unwrap());
        assert_eq!(first.len(), 5);
        assert!(first.windows(2).all(|pair| pair[0] < pair[1]));
        assert!(first.iter().all(|&i| i < 20));
        assert!(matches!(
            sampler.sample(2, 3),
            Err(ManifestError::SampleTooLarge { requested: 3, available: 2 })
        ));
    }
}
