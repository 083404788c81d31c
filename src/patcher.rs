//! Applies a validated fix to disk under strict safety rules.
//!
//! Order of operations: path gate, read + decode, content match, backup,
//! stale-write recheck, atomic temp-file replace. A failure at any step
//! leaves the target file untouched; a half-created backup is kept.

use crate::encoding::{self, LineEnding};
use crate::llm::parse::{FixEdit, FixSuggestion};
use chrono::Local;
use rand::Rng;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Directory under the root where pre-patch copies are kept.
const BACKUP_SUBDIR: &str = ".tsugix/backup";
const TMP_PREFIX: &str = ".tsugix.tmp.";

#[derive(Debug, Clone)]
pub struct PatchOptions {
    /// Edits must resolve inside this directory unless
    /// `allow_outside_root` is set.
    pub root_directory: PathBuf,
    pub allow_outside_root: bool,
    pub create_backup: bool,
    /// Re-hash the file just before writing and refuse on drift.
    pub verify_content: bool,
}

impl Default for PatchOptions {
    fn default() -> Self {
        Self {
            root_directory: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            allow_outside_root: false,
            create_backup: true,
            verify_content: true,
        }
    }
}

/// Outcome of one apply. `backup_path` is empty unless a backup was made.
#[derive(Debug, Clone)]
pub struct PatchResult {
    pub success: bool,
    pub backup_path: PathBuf,
    pub error_message: Option<String>,
}

impl PatchResult {
    fn ok(backup_path: PathBuf) -> Self {
        Self {
            success: true,
            backup_path,
            error_message: None,
        }
    }

    fn failed(error: PatchError) -> Self {
        Self {
            success: false,
            backup_path: PathBuf::new(),
            error_message: Some(error.to_string()),
        }
    }
}

#[derive(Debug, Error)]
enum PatchError {
    #[error("fix contains no edits")]
    NoEdits,
    #[error("edit has an empty file path")]
    EmptyPath,
    #[error("path {0:?} resolves outside the allowed root")]
    OutsideRoot(PathBuf),
    #[error("cannot resolve root directory: {0}")]
    BadRoot(std::io::Error),
    #[error("failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("file {0:?} is not valid text in a supported encoding")]
    Decode(PathBuf),
    #[error("original code not found in {0:?}")]
    ContentNotFound(PathBuf),
    #[error("file {0:?} changed on disk during patching")]
    Stale(PathBuf),
    #[error("failed to write backup {path:?}: {source}")]
    Backup {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write {path:?}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

pub struct FilePatcher {
    options: PatchOptions,
}

impl FilePatcher {
    pub fn new(options: PatchOptions) -> Self {
        Self { options }
    }

    /// Apply the first edit of `fix`. The suggestion has already passed
    /// schema validation; this enforces the on-disk rules.
    pub fn apply(&self, fix: &FixSuggestion) -> PatchResult {
        match self.apply_inner(fix) {
            Ok(backup_path) => PatchResult::ok(backup_path),
            Err(err) => {
                debug!(error = %err, "patch failed");
                PatchResult::failed(err)
            }
        }
    }

    /// Dry run: path gate + read + content match, nothing written.
    pub fn verify(&self, fix: &FixSuggestion) -> bool {
        let Some(edit) = fix.edits.first() else {
            return false;
        };
        let Ok(target) = self.gate_path(&edit.file_path) else {
            return false;
        };
        let Ok(bytes) = fs::read(&target) else {
            return false;
        };
        let Some(decoded) = encoding::decode(&bytes) else {
            return false;
        };
        let file_lines = normalized_lines(&decoded.text);
        find_match(&file_lines, &edit.original_lines).is_some()
    }

    fn apply_inner(&self, fix: &FixSuggestion) -> Result<PathBuf, PatchError> {
        let edit = fix.edits.first().ok_or(PatchError::NoEdits)?;
        let target = self.gate_path(&edit.file_path)?;

        let original_bytes = fs::read(&target).map_err(|source| PatchError::Read {
            path: target.clone(),
            source,
        })?;
        let decoded =
            encoding::decode(&original_bytes).ok_or_else(|| PatchError::Decode(target.clone()))?;
        let line_ending = encoding::detect_line_ending(&decoded.text);
        let original_hash = Sha256::digest(&original_bytes);

        let file_lines = normalized_lines(&decoded.text);
        let match_index = find_match(&file_lines, &edit.original_lines)
            .ok_or_else(|| PatchError::ContentNotFound(target.clone()))?;

        let new_content = splice(&file_lines, match_index, edit, line_ending);

        let backup_path = if self.options.create_backup {
            self.write_backup(&target, &original_bytes)?
        } else {
            PathBuf::new()
        };

        if self.options.verify_content {
            let current = fs::read(&target).map_err(|source| PatchError::Read {
                path: target.clone(),
                source,
            })?;
            if Sha256::digest(&current) != original_hash {
                return Err(PatchError::Stale(target));
            }
        }

        let new_bytes = encoding::encode(&new_content, decoded.encoding, decoded.had_bom);
        self.replace_atomically(&target, &new_bytes)?;

        info!(path = %target.display(), "patch applied");
        Ok(backup_path)
    }

    /// Resolve `file_path` against the root and refuse anything that lands
    /// outside it, including `..` escapes. Purely lexical: the candidate is
    /// never touched on disk here.
    fn gate_path(&self, file_path: &str) -> Result<PathBuf, PatchError> {
        if file_path.trim().is_empty() {
            return Err(PatchError::EmptyPath);
        }
        let root = self
            .options
            .root_directory
            .canonicalize()
            .map_err(PatchError::BadRoot)?;

        let raw = Path::new(file_path);
        let joined = if raw.is_absolute() {
            raw.to_path_buf()
        } else {
            root.join(raw)
        };
        let resolved = normalize_lexically(&joined);

        if !self.options.allow_outside_root && !resolved.starts_with(&root) {
            return Err(PatchError::OutsideRoot(resolved));
        }
        Ok(resolved)
    }

    /// Copy the pre-patch bytes to
    /// `<root>/.tsugix/backup/<yyyymmdd_HHMMSS>/<relative-path>`.
    fn write_backup(&self, target: &Path, bytes: &[u8]) -> Result<PathBuf, PatchError> {
        let root = self
            .options
            .root_directory
            .canonicalize()
            .map_err(PatchError::BadRoot)?;
        let relative = match target.strip_prefix(&root) {
            Ok(rel) => rel.to_path_buf(),
            // Outside-root targets (opt-in) keep only their file name.
            Err(_) => target
                .file_name()
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("file")),
        };

        let stamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
        let dest = root.join(BACKUP_SUBDIR).join(stamp).join(relative);

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|source| PatchError::Backup {
                path: dest.clone(),
                source,
            })?;
        }
        fs::write(&dest, bytes).map_err(|source| PatchError::Backup {
            path: dest.clone(),
            source,
        })?;
        Ok(dest)
    }

    /// Write to a sibling temp file, fsync, then rename over the target.
    /// The temp file is removed on any failure.
    fn replace_atomically(&self, target: &Path, bytes: &[u8]) -> Result<(), PatchError> {
        let parent = target.parent().unwrap_or_else(|| Path::new("."));
        let suffix: u128 = rand::thread_rng().gen();
        let tmp = parent.join(format!("{}{:032x}", TMP_PREFIX, suffix));

        let write_result = (|| -> std::io::Result<()> {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(bytes)?;
            file.sync_all()?;
            fs::rename(&tmp, target)
        })();

        write_result.map_err(|source| {
            let _ = fs::remove_file(&tmp);
            PatchError::Write {
                path: target.to_path_buf(),
                source,
            }
        })
    }
}

/// File content split on normalized `\n`. A trailing newline yields a
/// final empty element, so rejoining reproduces it.
fn normalized_lines(text: &str) -> Vec<String> {
    text.replace("\r\n", "\n")
        .replace('\r', "\n")
        .split('\n')
        .map(str::to_string)
        .collect()
}

/// Smallest index where every expected line matches the file, compared
/// whitespace-tolerantly so re-indentation does not break the patch.
fn find_match(file_lines: &[String], original_lines: &[String]) -> Option<usize> {
    if original_lines.is_empty() || original_lines.len() > file_lines.len() {
        return None;
    }
    (0..=file_lines.len() - original_lines.len()).find(|&i| {
        original_lines
            .iter()
            .enumerate()
            .all(|(j, expected)| file_lines[i + j].trim() == expected.trim())
    })
}

/// Replace the matched range with the replacement lines and rejoin using
/// the file's detected line ending.
fn splice(
    file_lines: &[String],
    match_index: usize,
    edit: &FixEdit,
    line_ending: LineEnding,
) -> String {
    let replacement_lines: Vec<&str> = edit.replacement.split('\n').collect();
    let mut out: Vec<&str> = Vec::with_capacity(file_lines.len() + replacement_lines.len());
    out.extend(file_lines[..match_index].iter().map(String::as_str));
    // An empty replacement deletes the range rather than inserting a blank.
    if !edit.replacement.is_empty() {
        out.extend(replacement_lines.iter().copied());
    }
    out.extend(
        file_lines[match_index + edit.original_lines.len()..]
            .iter()
            .map(String::as_str),
    );
    out.join(line_ending.as_str())
}

/// Resolve `.` and `..` components without touching the filesystem.
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn one_edit_fix(file_path: &str, original: &[&str], replacement: &str) -> FixSuggestion {
        FixSuggestion {
            language: Some("Python".to_string()),
            edits: vec![FixEdit {
                file_path: file_path.to_string(),
                start_line: 1,
                end_line: original.len() as u32,
                original_lines: original.iter().map(|s| s.to_string()).collect(),
                replacement: replacement.to_string(),
            }],
            explanation: None,
            confidence: 80,
        }
    }

    fn patcher_for(root: &Path) -> FilePatcher {
        FilePatcher::new(PatchOptions {
            root_directory: root.to_path_buf(),
            allow_outside_root: false,
            create_backup: true,
            verify_content: true,
        })
    }

    #[test]
    fn test_apply_replaces_matched_lines() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("test.py"), "def divide(a, b):\n    return a / b\n").unwrap();
        let fix = one_edit_fix(
            "test.py",
            &["    return a / b"],
            "    return a / b if b != 0 else 0",
        );

        let result = patcher_for(dir.path()).apply(&fix);
        assert!(result.success, "error: {:?}", result.error_message);

        let patched = fs::read_to_string(dir.path().join("test.py")).unwrap();
        assert_eq!(
            patched,
            "def divide(a, b):\n    return a / b if b != 0 else 0\n"
        );
    }

    #[test]
    fn test_backup_contains_original_bytes() {
        let dir = TempDir::new().unwrap();
        let original = "def divide(a, b):\n    return a / b\n";
        fs::write(dir.path().join("test.py"), original).unwrap();
        let fix = one_edit_fix("test.py", &["    return a / b"], "    return 0");

        let result = patcher_for(dir.path()).apply(&fix);
        assert!(result.success);
        assert!(!result.backup_path.as_os_str().is_empty());
        let backup = fs::read_to_string(&result.backup_path).unwrap();
        assert_eq!(backup, original);
        // The backup tree mirrors the relative path under the stamp dir.
        assert!(result
            .backup_path
            .to_string_lossy()
            .contains(".tsugix/backup/"));
        assert!(result.backup_path.ends_with("test.py"));
    }

    #[test]
    fn test_no_backup_when_disabled() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.py"), "x = 1\n").unwrap();
        let fix = one_edit_fix("a.py", &["x = 1"], "x = 2");

        let patcher = FilePatcher::new(PatchOptions {
            root_directory: dir.path().to_path_buf(),
            create_backup: false,
            ..PatchOptions::default()
        });
        let result = patcher.apply(&fix);
        assert!(result.success);
        assert!(result.backup_path.as_os_str().is_empty());
        assert!(!dir.path().join(".tsugix").exists());
    }

    #[test]
    fn test_content_mismatch_fails_without_touching_disk() {
        let dir = TempDir::new().unwrap();
        let original = "completely different content\n";
        fs::write(dir.path().join("a.py"), original).unwrap();
        let fix = one_edit_fix("a.py", &["    return a / b"], "    return 0");

        let result = patcher_for(dir.path()).apply(&fix);
        assert!(!result.success);
        assert!(result
            .error_message
            .as_deref()
            .unwrap()
            .contains("original code not found"));
        assert!(result.backup_path.as_os_str().is_empty());
        assert_eq!(fs::read_to_string(dir.path().join("a.py")).unwrap(), original);
        // No backup directory was created on the mismatch path.
        assert!(!dir.path().join(".tsugix").exists());
    }

    #[test]
    fn test_path_traversal_rejected() {
        let dir = TempDir::new().unwrap();
        let fix = one_edit_fix("../../etc/passwd", &["root:x:0:0"], "pwned");
        let result = patcher_for(dir.path()).apply(&fix);
        assert!(!result.success);
        assert!(result
            .error_message
            .as_deref()
            .unwrap()
            .contains("outside the allowed root"));
    }

    #[test]
    fn test_absolute_path_outside_root_rejected() {
        let dir = TempDir::new().unwrap();
        let fix = one_edit_fix("/etc/hostname", &["anything"], "x");
        let result = patcher_for(dir.path()).apply(&fix);
        assert!(!result.success);
    }

    #[test]
    fn test_outside_root_allowed_when_opted_in() {
        let root = TempDir::new().unwrap();
        let other = TempDir::new().unwrap();
        let target = other.path().join("free.py");
        fs::write(&target, "x = 1\n").unwrap();

        let patcher = FilePatcher::new(PatchOptions {
            root_directory: root.path().to_path_buf(),
            allow_outside_root: true,
            create_backup: false,
            verify_content: true,
        });
        let fix = one_edit_fix(target.to_str().unwrap(), &["x = 1"], "x = 2");
        let result = patcher.apply(&fix);
        assert!(result.success, "error: {:?}", result.error_message);
    }

    #[test]
    fn test_crlf_line_endings_preserved() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("w.py"), "a = 1\r\nb = 2\r\n").unwrap();
        let fix = one_edit_fix("w.py", &["b = 2"], "b = 3");

        let result = patcher_for(dir.path()).apply(&fix);
        assert!(result.success);
        let patched = fs::read(dir.path().join("w.py")).unwrap();
        assert_eq!(patched, b"a = 1\r\nb = 3\r\n");
    }

    #[test]
    fn test_utf8_bom_preserved() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("b.py"), b"\xEF\xBB\xBFx = 1\n").unwrap();
        let fix = one_edit_fix("b.py", &["x = 1"], "x = 2");

        let result = patcher_for(dir.path()).apply(&fix);
        assert!(result.success);
        let patched = fs::read(dir.path().join("b.py")).unwrap();
        assert_eq!(patched, b"\xEF\xBB\xBFx = 2\n");
    }

    #[test]
    fn test_file_without_bom_stays_without_bom() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("n.py"), "x = 1\n").unwrap();
        let fix = one_edit_fix("n.py", &["x = 1"], "x = 2");
        patcher_for(dir.path()).apply(&fix);
        let patched = fs::read(dir.path().join("n.py")).unwrap();
        assert_eq!(patched, b"x = 2\n");
    }

    #[test]
    fn test_utf16le_round_trips_through_patch() {
        let dir = TempDir::new().unwrap();
        let bytes = encoding::encode("x = 1\ny = 2\n", encoding::Encoding::Utf16Le, true);
        fs::write(dir.path().join("u16.py"), &bytes).unwrap();
        let fix = one_edit_fix("u16.py", &["y = 2"], "y = 3");

        let result = patcher_for(dir.path()).apply(&fix);
        assert!(result.success);
        let patched = fs::read(dir.path().join("u16.py")).unwrap();
        let decoded = encoding::decode(&patched).unwrap();
        assert_eq!(decoded.text, "x = 1\ny = 3\n");
        assert_eq!(decoded.encoding, encoding::Encoding::Utf16Le);
        assert!(decoded.had_bom);
    }

    #[test]
    fn test_whitespace_tolerant_match() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("i.py"), "  return a / b\n").unwrap();
        // The model reported different indentation than the file has.
        let fix = one_edit_fix("i.py", &["    return a / b"], "    return 0");
        let result = patcher_for(dir.path()).apply(&fix);
        assert!(result.success);
    }

    #[test]
    fn test_multi_line_replacement() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("m.py"), "def f():\n    return a / b\nprint(f())\n").unwrap();
        let fix = one_edit_fix(
            "m.py",
            &["    return a / b"],
            "    if b == 0:\n        return 0\n    return a / b",
        );
        let result = patcher_for(dir.path()).apply(&fix);
        assert!(result.success);
        let patched = fs::read_to_string(dir.path().join("m.py")).unwrap();
        assert_eq!(
            patched,
            "def f():\n    if b == 0:\n        return 0\n    return a / b\nprint(f())\n"
        );
    }

    #[test]
    fn test_empty_replacement_deletes_lines() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("d.py"), "keep\ndelete me\nkeep too\n").unwrap();
        let fix = one_edit_fix("d.py", &["delete me"], "");
        let result = patcher_for(dir.path()).apply(&fix);
        assert!(result.success);
        assert_eq!(
            fs::read_to_string(dir.path().join("d.py")).unwrap(),
            "keep\nkeep too\n"
        );
    }

    #[test]
    fn test_verify_without_modification() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("v.py");
        let original = "x = 1\n";
        fs::write(&path, original).unwrap();
        let good = one_edit_fix("v.py", &["x = 1"], "x = 2");
        let bad = one_edit_fix("v.py", &["y = 9"], "y = 10");

        let patcher = patcher_for(dir.path());
        assert!(patcher.verify(&good));
        assert!(!patcher.verify(&bad));
        assert_eq!(fs::read_to_string(&path).unwrap(), original);
    }

    #[test]
    fn test_missing_file_fails_cleanly() {
        let dir = TempDir::new().unwrap();
        let fix = one_edit_fix("ghost.py", &["x"], "y");
        let result = patcher_for(dir.path()).apply(&fix);
        assert!(!result.success);
        assert!(result.error_message.is_some());
    }

    #[test]
    fn test_no_temp_files_left_behind() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("t.py"), "x = 1\n").unwrap();
        let fix = one_edit_fix("t.py", &["x = 1"], "x = 2");
        patcher_for(dir.path()).apply(&fix);

        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(TMP_PREFIX))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_match_picks_first_occurrence() {
        let file_lines: Vec<String> = ["a", "dup", "b", "dup"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let needle = vec!["dup".to_string()];
        assert_eq!(find_match(&file_lines, &needle), Some(1));
    }

    #[test]
    fn test_normalize_lexically_resolves_dots() {
        assert_eq!(
            normalize_lexically(Path::new("/a/b/../c/./d")),
            PathBuf::from("/a/c/d")
        );
        assert_eq!(
            normalize_lexically(Path::new("/root/../../etc")),
            PathBuf::from("/etc")
        );
    }
}
