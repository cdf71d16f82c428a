//! Packing: walk a source tree, classify entries and write the archive

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use walkdir::{DirEntry, WalkDir};

use crate::archive::{entry_path_problem, Archive, ArchiveHeader, CommandSpec, Entry, EntryKind, TypeTag};
use crate::classify::{probe_content, Classification, ExcludeReason, IgnoreConfig};
use crate::dispatch::{self, Request};
use crate::encoder::{functional_name, Encoder};
use crate::error::{Result, SedaError};

/// What to pack and how
#[derive(Debug, Clone, Default)]
pub struct PackOptions {
    /// Commit message / docstring
    pub message: Option<String>,
    /// Post-extraction commands, in order
    pub commands: Vec<CommandSpec>,
    /// Encrypt the payload under this passphrase (vault archive)
    pub passphrase: Option<String>,
    /// Produce an HTML polyglot
    pub web: bool,
    pub ignore: IgnoreConfig,
}

impl PackOptions {
    /// Tag this request composes to
    pub fn type_tag(&self) -> Result<TypeTag> {
        dispatch::compose(Request {
            message: self
                .message
                .as_deref()
                .is_some_and(|m| !m.trim_end_matches(['\n', '\r']).is_empty()),
            commands: !self.commands.is_empty(),
            vault: self.passphrase.is_some(),
            web: self.web,
        })
    }
}

/// A file or directory found under the pack root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEntry {
    /// Slash-separated path relative to the root
    pub path: String,
    pub data: Vec<u8>,
    pub is_dir: bool,
}

/// A source entry with its classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedEntry {
    pub source: SourceEntry,
    pub classification: Classification,
}

impl ClassifiedEntry {
    /// Archive entry for an included classification
    pub fn into_entry(self) -> Option<Entry> {
        let SourceEntry { path, data, .. } = self.source;
        match self.classification {
            Classification::Directory => Some(Entry::directory(path)),
            Classification::Text => Some(Entry::text(path, data)),
            Classification::Binary(_) => Some(Entry::binary(path, data)),
            Classification::Excluded(_) => None,
        }
    }
}

/// Outcome of a pack, for reporting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackReport {
    pub output: PathBuf,
    pub kind: TypeTag,
    /// Included entries: path, kind, size in bytes
    pub added: Vec<(String, EntryKind, usize)>,
    /// Entries left out, with the reason
    pub skipped: Vec<(String, ExcludeReason)>,
}

/// Walk `root` depth-first in file-name order and classify every entry.
/// Excluded directories are pruned without being read. `exclude` names a
/// file (the archive being written) that is never packed.
pub fn scan(
    root: &Path,
    ignore: &IgnoreConfig,
    exclude: Option<&Path>,
) -> Result<(Vec<ClassifiedEntry>, Vec<(String, ExcludeReason)>)> {
    if !root.is_dir() {
        return Err(SedaError::SourceNotFound(root.to_path_buf()));
    }

    let mut classified = Vec::new();
    let mut skipped = Vec::new();

    let mut walker = WalkDir::new(root)
        .follow_links(false)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter();

    while let Some(item) = walker.next() {
        let ent = item.map_err(|e| walk_error(root, e))?;
        let rel = relative_path(root, &ent)?;
        let is_dir = ent.file_type().is_dir();

        if ent.file_type().is_symlink() {
            log::warn!("skipping symlink '{}'", rel);
            continue;
        }
        if exclude.is_some_and(|ex| ex == ent.path()) {
            log::debug!("skipping output archive '{}'", rel);
            continue;
        }

        match ignore.classify_path(&rel, is_dir) {
            Some(Classification::Excluded(reason)) => {
                log::debug!("excluding '{}': {:?}", rel, reason);
                if is_dir {
                    walker.skip_current_dir();
                }
                skipped.push((rel, reason));
            }
            Some(Classification::Directory) => classified.push(ClassifiedEntry {
                source: SourceEntry {
                    path: rel,
                    data: Vec::new(),
                    is_dir: true,
                },
                classification: Classification::Directory,
            }),
            by_path => {
                let data = fs::read(ent.path()).map_err(|e| SedaError::io(ent.path(), e))?;
                let classification = by_path.unwrap_or_else(|| probe_content(&data));
                log::debug!("{} -> {:?}", rel, classification);
                classified.push(ClassifiedEntry {
                    source: SourceEntry {
                        path: rel,
                        data,
                        is_dir: false,
                    },
                    classification,
                });
            }
        }
    }

    Ok((classified, skipped))
}

fn walk_error(root: &Path, e: walkdir::Error) -> SedaError {
    let path = e.path().unwrap_or(root).to_path_buf();
    let msg = e.to_string();
    let io = e
        .into_io_error()
        .unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, msg));
    SedaError::io(path, io)
}

fn relative_path(root: &Path, ent: &DirEntry) -> Result<String> {
    let rel = ent.path().strip_prefix(root).unwrap_or(ent.path());
    let mut parts = Vec::new();
    for component in rel.components() {
        let part = component.as_os_str().to_str().ok_or_else(|| {
            SedaError::io(
                ent.path(),
                std::io::Error::new(std::io::ErrorKind::InvalidData, "file name is not valid UTF-8"),
            )
        })?;
        parts.push(part);
    }
    Ok(parts.join("/"))
}

/// Build the in-memory archive for `root`
pub fn build_archive(root: &Path, options: &PackOptions) -> Result<(Archive, Vec<(String, ExcludeReason)>)> {
    build_archive_excluding(root, options, None)
}

fn build_archive_excluding(
    root: &Path,
    options: &PackOptions,
    exclude: Option<&Path>,
) -> Result<(Archive, Vec<(String, ExcludeReason)>)> {
    let kind = options.type_tag()?;
    let mut header = ArchiveHeader::new(kind).with_commands(options.commands.clone());
    if let Some(message) = &options.message {
        header = header.with_message(message.clone());
    }

    let (classified, skipped) = scan(root, &options.ignore, exclude)?;
    let mut archive = Archive::with_header(header);
    for entry in classified.into_iter().filter_map(ClassifiedEntry::into_entry) {
        if let Some(reason) = entry_path_problem(&entry.path) {
            return Err(SedaError::UnpackablePath {
                path: root.join(&entry.path),
                reason,
            });
        }
        archive.add_entry(entry)?;
    }
    Ok((archive, skipped))
}

/// Pack `root` into an archive named after `output_base` plus the
/// functional extension of the composed tag. The archive is built in
/// memory, written to a temporary file beside the target and renamed into
/// place, so an interrupted pack leaves no partial archive.
pub fn pack(root: &Path, output_base: &Path, options: &PackOptions) -> Result<PackReport> {
    if !root.is_dir() {
        return Err(SedaError::SourceNotFound(root.to_path_buf()));
    }
    let kind = options.type_tag()?;

    let base_name = output_base
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            SedaError::io(
                output_base,
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "output needs a UTF-8 file name"),
            )
        })?;
    let out_dir = match output_base.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let file_name = functional_name(base_name, kind);
    let output = out_dir.join(&file_name);

    log::info!("packing '{}' into '{}' ({})", root.display(), output.display(), kind);

    let root = fs::canonicalize(root).map_err(|e| SedaError::io(root, e))?;
    let exclude = fs::canonicalize(&out_dir).ok().map(|d| d.join(&file_name));
    let (archive, skipped) = build_archive_excluding(&root, options, exclude.as_deref())?;

    let mut encoder = Encoder::new().with_display_name(file_name.clone());
    if let Some(passphrase) = &options.passphrase {
        encoder = encoder.with_passphrase(passphrase.clone());
    }
    let encoded = encoder.encode(&archive)?;
    write_atomically(&output, encoded.as_bytes())?;

    log::info!("wrote {} entries to '{}'", archive.entries.len(), output.display());

    Ok(PackReport {
        output,
        kind,
        added: archive
            .entries
            .iter()
            .map(|e| (e.path.clone(), e.kind, e.data.len()))
            .collect(),
        skipped,
    })
}

fn write_atomically(path: &Path, data: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| SedaError::io(dir, e))?;
    tmp.write_all(data).map_err(|e| SedaError::io(tmp.path(), e))?;
    tmp.as_file().sync_all().map_err(|e| SedaError::io(tmp.path(), e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(tmp.path(), fs::Permissions::from_mode(0o755))
            .map_err(|e| SedaError::io(tmp.path(), e))?;
    }

    tmp.persist(path).map_err(|e| SedaError::io(path, e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_project() -> TempDir {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::write(root.join("README.md"), "# Sample Project\n").unwrap();
        fs::create_dir_all(root.join("src/utils")).unwrap();
        fs::write(root.join("src/main.rs"), "fn main() {}\n").unwrap();
        fs::write(root.join("src/utils/logo.png"), [0x89, b'P', b'N', b'G']).unwrap();
        fs::create_dir_all(root.join("empty")).unwrap();
        fs::create_dir_all(root.join(".git")).unwrap();
        fs::write(root.join(".git/config"), "[core]\n").unwrap();
        fs::create_dir_all(root.join("web/node_modules/pkg")).unwrap();
        fs::write(root.join("web/node_modules/pkg/index.js"), "x").unwrap();
        fs::write(root.join("web/app.js"), "console.log(1)\n").unwrap();
        fs::write(root.join("debug.log"), "noise").unwrap();
        dir
    }

    #[test]
    fn test_scan_order_and_ignores() {
        let project = sample_project();
        let (classified, skipped) = scan(project.path(), &IgnoreConfig::default(), None).unwrap();
        let paths: Vec<&str> = classified.iter().map(|c| c.source.path.as_str()).collect();

        assert_eq!(
            paths,
            vec!["README.md", "empty", "src", "src/main.rs", "src/utils", "src/utils/logo.png", "web", "web/app.js"]
        );
        let skipped: Vec<&str> = skipped.iter().map(|(p, _)| p.as_str()).collect();
        assert!(skipped.contains(&".git"));
        assert!(skipped.contains(&"web/node_modules"));
        assert!(skipped.contains(&"debug.log"));
        assert!(!skipped.iter().any(|p| p.contains("index.js")));
    }

    #[test]
    fn test_scan_missing_root() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");
        assert!(matches!(
            scan(&missing, &IgnoreConfig::default(), None),
            Err(SedaError::SourceNotFound(_))
        ));
    }

    #[test]
    fn test_build_archive_classifies() {
        let project = sample_project();
        let (archive, _) = build_archive(project.path(), &PackOptions::default()).unwrap();
        assert_eq!(archive.kind(), TypeTag::Core);
        assert_eq!(archive.get("src/utils/logo.png").unwrap().kind, EntryKind::Binary);
        assert_eq!(archive.get("src/main.rs").unwrap().kind, EntryKind::Text);
        assert!(archive.get("empty").unwrap().is_dir());
    }

    #[test]
    fn test_pack_names_output_by_type() {
        let project = sample_project();
        let out = TempDir::new().unwrap();

        let options = PackOptions {
            message: Some("Add sample".to_string()),
            ..Default::default()
        };
        let report = pack(project.path(), &out.path().join("change.seda"), &options).unwrap();
        assert_eq!(report.kind, TypeTag::Commit);
        assert_eq!(report.output, out.path().join("change.commit.seda"));
        assert!(report.output.exists());

        let options = PackOptions {
            commands: vec![CommandSpec::new("make")],
            ..Default::default()
        };
        let report = pack(project.path(), &out.path().join("change"), &options).unwrap();
        assert_eq!(report.output, out.path().join("change.construct.seda"));
    }

    #[test]
    fn test_pack_rejects_undeclared_combination_before_writing() {
        let project = sample_project();
        let out = TempDir::new().unwrap();
        let options = PackOptions {
            passphrase: Some("pw".to_string()),
            commands: vec![CommandSpec::new("make")],
            ..Default::default()
        };
        assert!(matches!(
            pack(project.path(), &out.path().join("x"), &options),
            Err(SedaError::UnsupportedCombination(_))
        ));
        assert_eq!(fs::read_dir(out.path()).unwrap().count(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_colon_and_backslash_names_pack_and_extract() {
        let project = TempDir::new().unwrap();
        fs::write(project.path().join("a:b.txt"), "colon\n").unwrap();
        fs::write(project.path().join("a\\b.txt"), "backslash\n").unwrap();
        let out = TempDir::new().unwrap();

        let report = pack(project.path(), &out.path().join("names"), &PackOptions::default()).unwrap();
        let paths: Vec<&str> = report.added.iter().map(|(p, _, _)| p.as_str()).collect();
        assert_eq!(paths, vec!["a:b.txt", "a\\b.txt"]);

        let dest = out.path().join("dest");
        crate::extract::extract_file(&report.output, &crate::extract::ExtractOptions::new(&dest)).unwrap();
        assert_eq!(fs::read_to_string(dest.join("a:b.txt")).unwrap(), "colon\n");
        assert_eq!(fs::read_to_string(dest.join("a\\b.txt")).unwrap(), "backslash\n");
    }

    #[cfg(unix)]
    #[test]
    fn test_unstorable_name_names_source_file() {
        let project = TempDir::new().unwrap();
        fs::write(project.path().join("..\\x"), "x").unwrap();

        let err = build_archive(project.path(), &PackOptions::default()).unwrap_err();
        match err {
            SedaError::UnpackablePath { path, reason } => {
                assert_eq!(path, project.path().join("..\\x"));
                assert_eq!(reason, "relative segment");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_pack_is_reproducible() {
        let project = sample_project();
        let out = TempDir::new().unwrap();
        let first = pack(project.path(), &out.path().join("a"), &PackOptions::default()).unwrap();
        let second = pack(project.path(), &out.path().join("b"), &PackOptions::default()).unwrap();
        assert_eq!(fs::read(first.output).unwrap(), fs::read(second.output).unwrap());
    }

    #[test]
    fn test_recursive_pack_skips_own_output() {
        let project = sample_project();
        fs::write(project.path().join("old.seda"), "seda-format: 2\n").unwrap();
        let options = PackOptions {
            ignore: IgnoreConfig::default().with_recursive_pack_seda(true),
            ..Default::default()
        };

        let report = pack(project.path(), &project.path().join("self"), &options).unwrap();
        assert!(report.added.iter().any(|(p, _, _)| p == "old.seda"));
        assert!(!report.added.iter().any(|(p, _, _)| p == "self.seda"));

        // A second run must not pick up the archive written by the first
        let report = pack(project.path(), &project.path().join("self"), &options).unwrap();
        assert!(!report.added.iter().any(|(p, _, _)| p == "self.seda"));
    }
}
