//! Atomic file replacement.

use std::fs::{self, Permissions};
use std::io::{self, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

/// Write `data` to `path` atomically with permission bits `mode`.
///
/// The data goes to a temporary file in the same directory, is fsynced and
/// given its final mode, then renamed over `path`. On any failure the
/// temporary file is removed and `path` is left untouched.
///
/// # Errors
///
/// Returns the underlying I/O error from any step.
pub fn write_atomic(path: &Path, data: &[u8], mode: u32) -> io::Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    let mut tmp = tempfile::Builder::new().prefix(".tmp-").tempfile_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.as_file().set_permissions(Permissions::from_mode(mode))?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Like [`write_atomic`] but creates missing parent directories first.
///
/// # Errors
///
/// Returns the underlying I/O error from any step.
pub fn write_atomic_create_dirs(path: &Path, data: &[u8], mode: u32) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    write_atomic(path, data, mode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn mode_of(path: &Path) -> u32 {
        fs::metadata(path).unwrap().permissions().mode() & 0o777
    }

    #[test]
    fn writes_content_and_mode() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("key");

        write_atomic(&path, b"abc\n", 0o600).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"abc\n");
        assert_eq!(mode_of(&path), 0o600);
    }

    #[test]
    fn replaces_existing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pub");
        fs::write(&path, b"old").unwrap();

        write_atomic(&path, b"new", 0o644).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"new");
        assert_eq!(mode_of(&path), 0o644);
    }

    #[test]
    fn leaves_no_temp_files_behind() {
        let dir = TempDir::new().unwrap();
        write_atomic(&dir.path().join("a"), b"1", 0o644).unwrap();

        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("a")]);
    }

    #[test]
    fn missing_directory_fails_without_create() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nope").join("file");
        assert!(write_atomic(&path, b"x", 0o644).is_err());

        write_atomic_create_dirs(&path, b"x", 0o644).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"x");
    }
}
