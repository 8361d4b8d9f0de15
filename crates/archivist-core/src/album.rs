use std::collections::HashMap;
use std::path::Path;

use crate::error::Result;
use crate::types::ImageRecord;

/// Image counts per album, memoized for the lifetime of one document build.
///
/// Create one per render, pass it by `&mut`, drop it afterwards. Counts are
/// not shared between unrelated builds, so a re-import is always picked up.
#[derive(Debug, Default)]
pub struct AlbumSizes {
    sizes: HashMap<String, usize>,
}

impl AlbumSizes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of images in the record's album directory.
    pub fn size_of(&mut self, record: &ImageRecord) -> Result<usize> {
        if let Some(size) = self.sizes.get(&record.album) {
            return Ok(*size);
        }
        let size = count_album_images(Path::new(&record.album_path))?;
        self.sizes.insert(record.album.clone(), size);
        Ok(size)
    }
}

/// Files directly inside `dir` that carry an extension.
fn count_album_images(dir: &Path) -> Result<usize> {
    let mut count = 0;
    for entry in walkdir::WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(std::io::Error::from)?;
        if entry.file_type().is_file() && entry.path().extension().is_some() {
            count += 1;
        }
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;
    use std::fs;
    use tempfile::TempDir;

    fn record_in(album_path: &Path) -> ImageRecord {
        ImageRecord {
            id: "x".into(),
            ordinal: 1,
            title: "t".into(),
            timestamp: NaiveDateTime::default(),
            timestamp_str: String::new(),
            path: String::new(),
            json_path: String::new(),
            txt_path: String::new(),
            album: "2023-07".into(),
            album_title: "July 2023".into(),
            album_path: album_path.to_string_lossy().to_string(),
        }
    }

    #[test]
    fn counts_once_per_build() {
        let tmp = TempDir::new().unwrap();
        let album = tmp.path().join("2023-07");
        fs::create_dir_all(album.join("json")).unwrap();
        fs::write(album.join("1_a.jpg"), b"").unwrap();
        fs::write(album.join("2_b.jpg"), b"").unwrap();
        fs::write(album.join("README"), b"").unwrap();

        let record = record_in(&album);
        let mut sizes = AlbumSizes::new();
        assert_eq!(sizes.size_of(&record).unwrap(), 2);

        // Memoized: a new file is not seen by the same build...
        fs::write(album.join("3_c.jpg"), b"").unwrap();
        assert_eq!(sizes.size_of(&record).unwrap(), 2);

        // ...but a fresh build recounts.
        assert_eq!(AlbumSizes::new().size_of(&record).unwrap(), 3);
    }
}
