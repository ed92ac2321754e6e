use std::{fs, io, path::Path};

use tracing::{debug, info, warn};

use crate::error::FetchError;

/// Extracts a zip archive into `dest`, creating it when needed.
///
/// Returns the number of files written. An unreadable archive or a corrupt
/// entry is an `Integrity` error; the archive itself is never removed.
pub fn extract_zip(archive: &Path, dest: &Path) -> Result<usize, FetchError> {
    let integrity = |reason: String| FetchError::Integrity {
        path: archive.to_path_buf(),
        reason,
    };

    let file = fs::File::open(archive).map_err(|e| FetchError::io(archive, e))?;
    let mut zip = zip::ZipArchive::new(file).map_err(|e| integrity(format!("bad zip: {e}")))?;
    fs::create_dir_all(dest).map_err(|e| FetchError::io(dest, e))?;

    info!(
        "Extracting archive {} into {}",
        archive.display(),
        dest.display()
    );

    let mut written = 0usize;
    for index in 0..zip.len() {
        let mut entry = zip
            .by_index(index)
            .map_err(|e| integrity(format!("failed to read entry {index}: {e}")))?;

        let Some(relative) = entry.enclosed_name().map(Path::to_path_buf) else {
            warn!("Skipping zip entry with unsafe path: {}", entry.name());
            continue;
        };
        let out_path = dest.join(&relative);

        if entry.is_dir() {
            fs::create_dir_all(&out_path).map_err(|e| FetchError::io(&out_path, e))?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent).map_err(|e| FetchError::io(parent, e))?;
        }

        let mut out = fs::File::create(&out_path).map_err(|e| FetchError::io(&out_path, e))?;
        io::copy(&mut entry, &mut out)
            .map_err(|e| integrity(format!("corrupt entry {}: {e}", relative.display())))?;
        set_permissions(&out_path, entry.unix_mode());
        debug!("extracted {}", out_path.display());
        written += 1;
    }

    Ok(written)
}

#[cfg(unix)]
fn set_permissions(path: &Path, mode: Option<u32>) {
    use std::os::unix::fs::PermissionsExt;

    if let Some(mode) = mode {
        if let Err(err) = fs::set_permissions(path, fs::Permissions::from_mode(mode)) {
            warn!("Failed to set mode on {}: {}", path.display(), err);
        }
    }
}

#[cfg(not(unix))]
fn set_permissions(_path: &Path, _mode: Option<u32>) {}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use zip::write::FileOptions;

    use super::*;

    fn write_zip(path: &Path, files: &[(&str, &[u8])]) {
        let file = fs::File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        for (name, data) in files {
            writer.start_file(*name, FileOptions::default()).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn extracts_nested_entries() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("tools.zip");
        write_zip(
            &archive,
            &[
                ("platform-tools/adb", b"adb-binary"),
                ("platform-tools/fastboot", b"fastboot-binary"),
            ],
        );

        let dest = dir.path().join("out");
        let count = extract_zip(&archive, &dest).unwrap();

        assert_eq!(count, 2);
        assert_eq!(
            fs::read(dest.join("platform-tools/adb")).unwrap(),
            b"adb-binary"
        );
    }

    #[test]
    fn garbage_is_an_integrity_error_and_file_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("broken.zip");
        fs::write(&archive, b"this is not a zip archive").unwrap();

        let err = extract_zip(&archive, &dir.path().join("out")).unwrap_err();

        assert!(matches!(err, FetchError::Integrity { .. }), "{err:?}");
        assert!(archive.exists());
    }
}
