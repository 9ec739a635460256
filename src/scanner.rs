//! Knowledge-base directory scanner.
//!
//! Walks the KB root, keeps files whose extension is allowed, and emits a
//! [`DocumentDescriptor`] per file with a streaming SHA-256 content hash.
//! Scanning is read-only and idempotent. A file that cannot be read is
//! logged and skipped; only a missing root aborts the scan.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Component, Path};

use globset::{Glob, GlobSet, GlobSetBuilder};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::models::DocumentDescriptor;

/// Read block size for hashing. The digest does not depend on it.
const HASH_BLOCK_SIZE: usize = 64 * 1024;

/// VCS metadata is never a document, whatever the configured excludes.
const ALWAYS_EXCLUDED: [&str; 1] = ["**/.git/**"];

/// Scan tuning beyond the allowed extensions.
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    /// Allowed extensions, case-insensitive, with or without a leading dot.
    pub extensions: Vec<String>,
    /// Extra globs (relative to the root) to skip.
    pub exclude_globs: Vec<String>,
    pub follow_symlinks: bool,
}

/// Scan `root` for files with one of the allowed `extensions`.
pub fn scan(root: &Path, extensions: &[String]) -> Result<Vec<DocumentDescriptor>> {
    scan_with(
        root,
        &ScanOptions {
            extensions: extensions.to_vec(),
            ..Default::default()
        },
    )
}

/// Scan `root` with full [`ScanOptions`]. Results are sorted by `doc_id`.
///
/// Two paths that flatten to the same `doc_id` (`x/y.md` and `x_y.md`)
/// would share one version record and overwrite each other's chunks, so
/// only the lexicographically first path is kept and the rest are logged.
pub fn scan_with(root: &Path, options: &ScanOptions) -> Result<Vec<DocumentDescriptor>> {
    if !root.is_dir() {
        return Err(Error::InvalidConfig(format!(
            "knowledge-base root is not a directory: {}",
            root.display()
        )));
    }

    let allowed: Vec<String> = options
        .extensions
        .iter()
        .map(|e| normalize_extension(e))
        .filter(|e| !e.is_empty())
        .collect();

    let mut excludes: Vec<String> = ALWAYS_EXCLUDED.iter().map(|s| s.to_string()).collect();
    excludes.extend(options.exclude_globs.iter().cloned());
    let exclude_set = build_globset(&excludes)?;

    let mut descriptors = Vec::new();

    for entry in WalkDir::new(root).follow_links(options.follow_symlinks) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "skipping unreadable directory entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        if exclude_set.is_match(relative) {
            continue;
        }

        let extension = path
            .extension()
            .map(|e| normalize_extension(&e.to_string_lossy()))
            .unwrap_or_default();
        if !allowed.contains(&extension) {
            continue;
        }

        match describe_file(path, relative, extension) {
            Ok(descriptor) => {
                debug!(doc_id = %descriptor.doc_id, size = descriptor.size, "scanned");
                descriptors.push(descriptor);
            }
            Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable file"),
        }
    }

    descriptors.sort_by(|a, b| {
        a.doc_id
            .cmp(&b.doc_id)
            .then_with(|| a.file_path.cmp(&b.file_path))
    });
    descriptors.dedup_by(|dup, kept| {
        let collides = dup.doc_id == kept.doc_id;
        if collides {
            warn!(
                doc_id = %kept.doc_id,
                kept = %kept.file_path.display(),
                skipped = %dup.file_path.display(),
                "document id collision, skipping file"
            );
        }
        collides
    });
    Ok(descriptors)
}

/// Derive a key-safe document id from a root-relative path.
pub fn doc_id_for(relative: &Path) -> String {
    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("_")
}

/// SHA-256 of a file, read in fixed-size blocks.
pub fn hash_file(path: &Path) -> Result<(String, u64)> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_BLOCK_SIZE];
    let mut size = 0u64;
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        size += n as u64;
    }
    Ok((format!("{:x}", hasher.finalize()), size))
}

fn describe_file(path: &Path, relative: &Path, extension: String) -> Result<DocumentDescriptor> {
    let (content_hash, size) = hash_file(path)?;
    Ok(DocumentDescriptor {
        doc_id: doc_id_for(relative),
        file_path: path.to_path_buf(),
        content_hash,
        size,
        extension,
    })
}

fn normalize_extension(ext: &str) -> String {
    ext.trim().trim_start_matches('.').to_lowercase()
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| Error::InvalidConfig(format!("bad exclude glob '{}': {}", pattern, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| Error::InvalidConfig(format!("bad exclude globs: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn exts() -> Vec<String> {
        vec!["md".to_string(), ".TXT".to_string()]
    }

    fn fixture() -> TempDir {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("guides/deep")).unwrap();
        fs::create_dir_all(root.join(".git")).unwrap();
        fs::write(root.join("a.md"), "alpha").unwrap();
        fs::write(root.join("b.txt"), "beta").unwrap();
        fs::write(root.join("guides/c.md"), "gamma").unwrap();
        fs::write(root.join("guides/deep/d.MD"), "delta").unwrap();
        fs::write(root.join("image.png"), [0u8, 1, 2]).unwrap();
        fs::write(root.join(".git/e.md"), "ignored").unwrap();
        tmp
    }

    #[test]
    fn test_scan_finds_allowed_files_only() {
        let tmp = fixture();
        let docs = scan(tmp.path(), &exts()).unwrap();
        let ids: Vec<&str> = docs.iter().map(|d| d.doc_id.as_str()).collect();
        assert_eq!(ids, ["a.md", "b.txt", "guides_c.md", "guides_deep_d.MD"]);
        for d in &docs {
            assert_eq!(d.content_hash.len(), 64);
            assert!(d.content_hash.chars().all(|c| c.is_ascii_hexdigit()));
        }
        assert_eq!(docs[3].extension, "md");
    }

    #[test]
    fn test_scan_is_stable_across_runs() {
        let tmp = fixture();
        let first = scan(tmp.path(), &exts()).unwrap();
        let second = scan(tmp.path(), &exts()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_hash_matches_known_digest() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("abc.md");
        fs::write(&path, "abc").unwrap();
        let (hash, size) = hash_file(&path).unwrap();
        assert_eq!(
            hash,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(size, 3);
    }

    #[test]
    fn test_hash_independent_of_block_boundaries() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("big.md");
        let content = "x".repeat(HASH_BLOCK_SIZE * 2 + 17);
        fs::write(&path, &content).unwrap();
        let (hash, size) = hash_file(&path).unwrap();
        let expected = format!("{:x}", Sha256::digest(content.as_bytes()));
        assert_eq!(hash, expected);
        assert_eq!(size, content.len() as u64);
    }

    #[test]
    fn test_exclude_globs() {
        let tmp = fixture();
        let docs = scan_with(
            tmp.path(),
            &ScanOptions {
                extensions: exts(),
                exclude_globs: vec!["guides/**".to_string()],
                follow_symlinks: false,
            },
        )
        .unwrap();
        assert_eq!(docs.len(), 2);
    }

    #[test]
    fn test_colliding_doc_ids_keep_first_path() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("x")).unwrap();
        fs::write(tmp.path().join("x/y.md"), "aardvark").unwrap();
        fs::write(tmp.path().join("x_y.md"), "badger").unwrap();

        for _ in 0..3 {
            let docs = scan(tmp.path(), &exts()).unwrap();
            assert_eq!(docs.len(), 1);
            assert_eq!(docs[0].doc_id, "x_y.md");
            assert!(docs[0].file_path.ends_with(Path::new("x").join("y.md")));
        }
    }

    #[test]
    fn test_build_dirs_are_not_excluded_by_default() {
        let tmp = fixture();
        fs::create_dir_all(tmp.path().join("target")).unwrap();
        fs::write(tmp.path().join("target/t.md"), "shooting range notes").unwrap();
        let docs = scan(tmp.path(), &exts()).unwrap();
        assert!(docs.iter().any(|d| d.doc_id == "target_t.md"));
        assert!(!docs.iter().any(|d| d.doc_id.starts_with(".git")));
    }

    #[test]
    fn test_missing_root_is_config_error() {
        let tmp = TempDir::new().unwrap();
        let err = scan(&tmp.path().join("nope"), &exts()).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn test_doc_id_replaces_separators() {
        let rel = Path::new("guides").join("deep").join("d.md");
        assert_eq!(doc_id_for(&rel), "guides_deep_d.md");
    }
}
