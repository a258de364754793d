//! Durable images: a [`FileSystem`] snapshot encoded as JSON on disk.

use log::{info, warn};
use poolfs::{FileSystem, FsError, Image};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;

pub const DEFAULT_IMAGE_PATH: &str = "./storage.json";

#[derive(Error, Debug)]
pub enum ImageError {
    #[error("could not access image: {0}")]
    Io(#[from] io::Error),
    #[error("malformed image: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("image does not describe a valid filesystem: {0}")]
    Restore(#[from] FsError),
}

/// Writes the filesystem to `path`.
///
/// The image goes to a temporary file next to `path` first and is renamed over
/// it once complete, so a crash mid-write leaves the previous image intact.
pub fn save<P: AsRef<Path>>(path: P, fs: &FileSystem) -> Result<(), ImageError> {
    let path = path.as_ref();
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut tmp = NamedTempFile::new_in(dir)?;
    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        serde_json::to_writer(&mut writer, &fs.snapshot())?;
        writer.flush()?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|err| err.error)?;
    info!("saved image to {}", path.display());
    Ok(())
}

/// Reads the filesystem stored at `path`, or `None` if there is no image yet.
pub fn load<P: AsRef<Path>>(path: P) -> Result<Option<FileSystem>, ImageError> {
    let path = path.as_ref();
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let image: Image = serde_json::from_reader(BufReader::new(file))?;
    let fs = FileSystem::restore(&image)?;
    info!("loaded image from {}", path.display());
    Ok(Some(fs))
}

/// Renames an unreadable image to `<path>.corrupt` so a later save cannot
/// overwrite it, and returns the new location.
pub fn set_aside<P: AsRef<Path>>(path: P) -> Result<PathBuf, ImageError> {
    let path = path.as_ref();
    let mut aside = path.as_os_str().to_owned();
    aside.push(".corrupt");
    let aside = PathBuf::from(aside);
    std::fs::rename(path, &aside)?;
    warn!("moved unreadable image {} to {}", path.display(), aside.display());
    Ok(aside)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_image_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load(dir.path().join("absent.json")).unwrap().is_none());
    }

    #[test]
    fn garbage_image_is_reported() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"not json").unwrap();
        match load(file.path()) {
            Err(ImageError::Encoding(_)) => (),
            other => panic!("expected an encoding error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn overcommitted_image_is_refused() {
        let mut image = FileSystem::new(poolfs::Geometry::new(64, 64).unwrap()).snapshot();
        image.pool.free_blocks.clear();
        image.pool.allocations = vec![
            poolfs::AllocationRecord {
                address: 0,
                size: 64,
                used: 0,
            },
            poolfs::AllocationRecord {
                address: 1,
                size: 63,
                used: 0,
            },
        ];
        let mut file = NamedTempFile::new().unwrap();
        serde_json::to_writer(file.as_file_mut(), &image).unwrap();

        match load(file.path()) {
            Err(ImageError::Restore(_)) => (),
            other => panic!("expected a restore error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn unreadable_image_is_set_aside() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("storage.json");
        std::fs::write(&path, b"{ broken").unwrap();

        assert!(load(&path).is_err());
        let aside = set_aside(&path).unwrap();
        assert_eq!(aside, dir.path().join("storage.json.corrupt"));
        assert_eq!(std::fs::read(&aside).unwrap(), b"{ broken");

        save(&path, &FileSystem::default()).unwrap();
        assert!(load(&path).unwrap().is_some());
        assert_eq!(std::fs::read(&aside).unwrap(), b"{ broken");
    }

    #[test]
    fn save_replaces_previous_image() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("storage.json");

        let mut fs = FileSystem::default();
        let root = fs.root();
        fs.create_file(root, "first").unwrap();
        save(&path, &fs).unwrap();

        fs.create_file(root, "second").unwrap();
        save(&path, &fs).unwrap();

        let loaded = load(&path).unwrap().unwrap();
        assert!(loaded.tree().get_child(loaded.root(), "second").is_some());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
