use crate::error::{BitsError, Result};
use crate::ignore::IgnoreRules;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{Cursor, Write};
use std::path::Path;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipArchive, ZipWriter};

const LARGE_ARCHIVE: usize = 1024 * 1024 * 1024; // 1GB

/// Zipped application bits ready for upload
#[derive(Debug, Clone)]
pub struct BitsArchive {
    pub bytes: Bytes,
    /// Lowercase hex SHA-256 of `bytes`
    pub sha256: String,
    pub file_count: usize,
}

impl BitsArchive {
    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    fn new(bytes: Vec<u8>, file_count: usize) -> Self {
        let sha256 = format!("{:x}", Sha256::digest(&bytes));
        Self {
            bytes: Bytes::from(bytes),
            sha256,
            file_count,
        }
    }
}

/// Archive an application path.
///
/// A directory is zipped (honoring `.cfignore`); an existing `.zip` file is
/// taken as-is. The result is byte-for-byte reproducible for unchanged
/// inputs, so its checksum can be compared with the remote package.
pub fn archive_path(path: &Path) -> Result<BitsArchive> {
    if !path.exists() {
        return Err(BitsError::PathNotFound(path.to_path_buf()));
    }

    let archive = if path.is_dir() {
        archive_dir(path)?
    } else if is_zip(path) {
        read_zip(path)?
    } else {
        archive_single_file(path)?
    };

    check_archive_size(archive.bytes.len());
    tracing::debug!(
        "Archived {}: {} files, {} bytes, sha256 {}",
        path.display(),
        archive.file_count,
        archive.size(),
        archive.sha256
    );
    Ok(archive)
}

/// Read a prebuilt droplet. The file is uploaded unchanged.
pub fn read_droplet(path: &Path) -> Result<BitsArchive> {
    if !path.is_file() {
        return Err(BitsError::PathNotFound(path.to_path_buf()));
    }
    let droplet = BitsArchive::new(fs::read(path)?, 1);
    tracing::debug!(
        "Read droplet {}: {} bytes, sha256 {}",
        path.display(),
        droplet.size(),
        droplet.sha256
    );
    Ok(droplet)
}

fn is_zip(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("zip"))
}

fn file_options() -> SimpleFileOptions {
    SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(DateTime::default())
}

#[cfg(unix)]
fn mode_of(metadata: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode()
}

#[cfg(not(unix))]
fn mode_of(metadata: &fs::Metadata) -> u32 {
    if metadata.is_dir() { 0o755 } else { 0o644 }
}

fn archive_dir(dir: &Path) -> Result<BitsArchive> {
    tracing::debug!("Creating bits archive from: {}", dir.display());
    let rules = IgnoreRules::for_dir(dir)?;

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let mut file_count = 0;

    let walker = WalkDir::new(dir)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            entry
                .path()
                .strip_prefix(dir)
                .map(|rel| !rules.is_ignored(rel))
                .unwrap_or(true)
        });

    for entry in walker {
        let entry = entry?;
        let Ok(relative) = entry.path().strip_prefix(dir) else {
            continue;
        };
        if relative.as_os_str().is_empty() {
            continue;
        }
        // zip entries always use forward slashes
        let name = relative
            .components()
            .filter_map(|c| c.as_os_str().to_str())
            .collect::<Vec<_>>()
            .join("/");

        let metadata = entry.path().symlink_metadata()?;
        let options = file_options().unix_permissions(mode_of(&metadata) & 0o777);

        if metadata.is_dir() {
            zip.add_directory(format!("{}/", name), options)?;
        } else if metadata.file_type().is_symlink() {
            let target = fs::read_link(entry.path())?;
            zip.add_symlink(name, target.to_string_lossy(), options)?;
            file_count += 1;
        } else {
            zip.start_file(name, options)?;
            zip.write_all(&fs::read(entry.path())?)?;
            file_count += 1;
        }
    }

    if file_count == 0 {
        return Err(BitsError::Empty(dir.to_path_buf()));
    }

    let bytes = zip.finish()?.into_inner();
    Ok(BitsArchive::new(bytes, file_count))
}

fn archive_single_file(path: &Path) -> Result<BitsArchive> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| BitsError::PathNotFound(path.to_path_buf()))?;
    let metadata = fs::metadata(path)?;

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    zip.start_file(name, file_options().unix_permissions(mode_of(&metadata) & 0o777))?;
    zip.write_all(&fs::read(path)?)?;
    let bytes = zip.finish()?.into_inner();
    Ok(BitsArchive::new(bytes, 1))
}

fn read_zip(path: &Path) -> Result<BitsArchive> {
    let bytes = fs::read(path)?;
    let file_count = ZipArchive::new(Cursor::new(bytes.as_slice()))?
        .file_names()
        .filter(|n| !n.ends_with('/'))
        .count();
    if file_count == 0 {
        return Err(BitsError::Empty(path.to_path_buf()));
    }
    Ok(BitsArchive::new(bytes, file_count))
}

fn check_archive_size(size: usize) {
    if size > LARGE_ARCHIVE {
        tracing::warn!(
            "Application bits are very large ({}MB); consider adding a {} file",
            size / 1024 / 1024,
            crate::ignore::IGNORE_FILE
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::tempdir;

    fn entry_names(archive: &BitsArchive) -> Vec<String> {
        let zip = ZipArchive::new(Cursor::new(archive.bytes.to_vec())).unwrap();
        let mut names: Vec<String> = zip.file_names().map(str::to_string).collect();
        names.sort();
        names
    }

    #[test]
    fn test_read_droplet() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("web.tgz");
        fs::write(&path, b"droplet").unwrap();

        let droplet = read_droplet(&path).unwrap();
        assert_eq!(droplet.bytes.as_ref(), b"droplet");
        assert_eq!(droplet.sha256, format!("{:x}", Sha256::digest(b"droplet")));

        assert!(matches!(
            read_droplet(&dir.path().join("missing.tgz")),
            Err(BitsError::PathNotFound(_))
        ));
        assert!(matches!(
            read_droplet(dir.path()),
            Err(BitsError::PathNotFound(_))
        ));
    }

    #[test]
    fn test_archive_dir() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("app.rb"), "puts 'hi'").unwrap();
        fs::create_dir(dir.path().join("lib")).unwrap();
        fs::write(dir.path().join("lib/helper.rb"), "module Helper; end").unwrap();

        let archive = archive_path(dir.path()).unwrap();
        assert_eq!(archive.file_count, 2);
        assert_eq!(archive.sha256.len(), 64);
        assert_eq!(entry_names(&archive), vec!["app.rb", "lib/", "lib/helper.rb"]);

        let mut zip = ZipArchive::new(Cursor::new(archive.bytes.to_vec())).unwrap();
        let mut content = String::new();
        zip.by_name("lib/helper.rb")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "module Helper; end");
    }

    #[test]
    fn test_archive_is_reproducible() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("index.js"), "console.log(1)").unwrap();

        let first = archive_path(dir.path()).unwrap();
        let second = archive_path(dir.path()).unwrap();
        assert_eq!(first.sha256, second.sha256);

        fs::write(dir.path().join("index.js"), "console.log(2)").unwrap();
        let changed = archive_path(dir.path()).unwrap();
        assert_ne!(first.sha256, changed.sha256);
    }

    #[test]
    fn test_ignore_file_is_honored() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(".cfignore"), "*.log\nnode_modules/\n").unwrap();
        fs::write(dir.path().join("server.js"), "x").unwrap();
        fs::write(dir.path().join("debug.log"), "noise").unwrap();
        fs::write(dir.path().join("manifest.yml"), "applications: []").unwrap();
        fs::create_dir_all(dir.path().join("node_modules/left-pad")).unwrap();
        fs::write(dir.path().join("node_modules/left-pad/index.js"), "x").unwrap();
        fs::create_dir(dir.path().join(".git")).unwrap();
        fs::write(dir.path().join(".git/HEAD"), "ref").unwrap();

        let archive = archive_path(dir.path()).unwrap();
        assert_eq!(entry_names(&archive), vec!["server.js"]);
    }

    #[test]
    fn test_empty_dir() {
        let dir = tempdir().unwrap();
        assert!(matches!(archive_path(dir.path()), Err(BitsError::Empty(_))));
    }

    #[test]
    fn test_missing_path() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(matches!(archive_path(&missing), Err(BitsError::PathNotFound(_))));
    }

    #[test]
    fn test_existing_zip_taken_as_is() {
        let dir = tempdir().unwrap();
        let zip_path = dir.path().join("app.zip");
        {
            let mut zip = ZipWriter::new(fs::File::create(&zip_path).unwrap());
            zip.start_file("main.go", SimpleFileOptions::default()).unwrap();
            zip.write_all(b"package main").unwrap();
            zip.finish().unwrap();
        }
        let raw = fs::read(&zip_path).unwrap();

        let archive = archive_path(&zip_path).unwrap();
        assert_eq!(archive.file_count, 1);
        assert_eq!(archive.bytes.as_ref(), raw.as_slice());
    }
}
