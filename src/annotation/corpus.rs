//! Fixture corpus loading.
//!
//! The corpus is a directory tree `<root>/<category>/<name>.<ext>`. Every
//! fixture is loaded independently: a bad annotation or an unknown category
//! rejects that one file and the load carries on.

use super::fixture::{Category, FixtureCase};
use crate::core::{CorpusError, DescriptorErrorKind};
use log::{debug, warn};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Source extensions picked up when the configuration does not say otherwise.
pub const DEFAULT_EXTENSIONS: &[&str] = &[".c", ".cc", ".cpp", ".cxx", ".C", ".h", ".hpp"];

/// A fixture that was excluded from the run, with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedFixture {
    pub path: PathBuf,
    /// Descriptor error kind, when the rejection came from an annotation.
    pub kind: Option<DescriptorErrorKind>,
    pub reason: String,
}

/// All fixtures of one run, sorted by id.
#[derive(Debug, Clone, Default)]
pub struct Corpus {
    fixtures: Vec<FixtureCase>,
    rejected: Vec<RejectedFixture>,
}

impl Corpus {
    /// Load every fixture under `root` whose extension is in `extensions`.
    ///
    /// Only an unreadable root is fatal.
    pub fn load(root: &Path, extensions: &[String]) -> Result<Self, CorpusError> {
        fs::read_dir(root).map_err(|source| CorpusError::Root {
            path: root.to_path_buf(),
            source,
        })?;

        let mut files = Vec::new();
        discover_sources(root, extensions, &mut files);
        files.sort();
        debug!("Discovered {} source files under {}", files.len(), root.display());

        let mut by_id: BTreeMap<String, (PathBuf, FixtureCase)> = BTreeMap::new();
        let mut rejected = Vec::new();
        for path in files {
            match load_fixture(root, &path) {
                Ok(fixture) => {
                    if let Some((existing, _)) = by_id.get(&fixture.id) {
                        let err = CorpusError::DuplicateId {
                            id: fixture.id.clone(),
                            existing: existing.clone(),
                        };
                        rejected.push(reject(&path, err));
                        continue;
                    }
                    by_id.insert(fixture.id.clone(), (path, fixture));
                }
                Err(err) => rejected.push(reject(&path, err)),
            }
        }

        Ok(Self {
            fixtures: by_id.into_values().map(|(_, fixture)| fixture).collect(),
            rejected,
        })
    }

    /// Build a corpus from already-parsed fixtures. Later duplicates of an id are dropped.
    pub fn from_fixtures(fixtures: impl IntoIterator<Item = FixtureCase>) -> Self {
        let mut by_id = BTreeMap::new();
        for fixture in fixtures {
            by_id.entry(fixture.id.clone()).or_insert(fixture);
        }
        Self {
            fixtures: by_id.into_values().collect(),
            rejected: Vec::new(),
        }
    }

    pub fn fixtures(&self) -> &[FixtureCase] {
        &self.fixtures
    }

    pub fn rejected(&self) -> &[RejectedFixture] {
        &self.rejected
    }

    pub fn get(&self, id: &str) -> Option<&FixtureCase> {
        self.fixtures
            .binary_search_by(|f| f.id.as_str().cmp(id))
            .ok()
            .map(|idx| &self.fixtures[idx])
    }

    pub fn len(&self) -> usize {
        self.fixtures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fixtures.is_empty()
    }
}

fn reject(path: &Path, err: CorpusError) -> RejectedFixture {
    warn!("Rejecting fixture {}: {}", path.display(), err);
    let kind = match &err {
        CorpusError::Descriptor(descriptor) => Some(descriptor.kind),
        _ => None,
    };
    RejectedFixture {
        path: path.to_path_buf(),
        kind,
        reason: err.to_string(),
    }
}

/// Recursively collect files with a matching extension.
fn discover_sources(dir: &Path, extensions: &[String], files: &mut Vec<PathBuf>) {
    let Ok(entries) = fs::read_dir(dir) else {
        warn!("Skipping unreadable directory {}", dir.display());
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            discover_sources(&path, extensions, files);
        } else if has_extension(&path, extensions) {
            files.push(path);
        }
    }
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return false;
    };
    extensions
        .iter()
        .any(|wanted| wanted.strip_prefix('.').unwrap_or(wanted) == ext)
}

fn load_fixture(root: &Path, path: &Path) -> Result<FixtureCase, CorpusError> {
    let relative = path.strip_prefix(root).unwrap_or(path);
    let components: Vec<String> = relative
        .with_extension("")
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    let id = components.join("/");
    let category_name = if components.len() > 1 {
        components[0].as_str()
    } else {
        ""
    };
    let category: Category = category_name
        .parse()
        .map_err(|category| CorpusError::UnknownCategory { category })?;

    let bytes = fs::read(path).map_err(|source| CorpusError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let source = String::from_utf8_lossy(&bytes).into_owned();
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{e}"))
        .unwrap_or_default();

    let fixture = FixtureCase::parse(id, category, extension, source)?;
    debug!(
        "Loaded fixture {} ({} assertions)",
        fixture.id,
        fixture.assertions.len()
    );
    Ok(fixture)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extensions() -> Vec<String> {
        DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect()
    }

    fn write(root: &Path, relative: &str, content: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_malformed_descriptor_rejects_only_its_fixture() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "arithmetic/constant-folding.c", "int f(void) { return 2 + 3; }");
        write(
            dir.path(),
            "hardening/bad.c",
            "/* @gallery-hints\n * extra-flags: -O1\n * replace-flags: -O3\n */\n",
        );
        write(dir.path(), "README.md", "not a fixture");

        let corpus = Corpus::load(dir.path(), &extensions()).unwrap();
        assert_eq!(corpus.len(), 1);
        assert!(corpus.get("arithmetic/constant-folding").is_some());
        assert_eq!(corpus.rejected().len(), 1);
        assert_eq!(
            corpus.rejected()[0].kind,
            Some(DescriptorErrorKind::ConflictingFlagMode)
        );
    }

    #[test]
    fn test_unknown_category_and_duplicate_ids() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "graphics/shader.c", "int x;");
        write(dir.path(), "memory/stack-reuse.c", "int y;");
        write(dir.path(), "memory/stack-reuse.cpp", "int z;");
        write(dir.path(), "loose.c", "int w;");

        let corpus = Corpus::load(dir.path(), &extensions()).unwrap();
        let ids: Vec<&str> = corpus.fixtures().iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, ["memory/stack-reuse"]);
        assert_eq!(corpus.fixtures()[0].extension, ".c");
        assert_eq!(corpus.rejected().len(), 3);
        assert!(corpus.rejected().iter().all(|r| r.kind.is_none()));
    }

    #[test]
    fn test_missing_root_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(matches!(
            Corpus::load(&missing, &extensions()),
            Err(CorpusError::Root { .. })
        ));
    }
}
