//! Plain-text megadoc: every transcript of a result set in one file, each
//! preceded by a small front-matter block.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use archivist_core::album::AlbumSizes;
use archivist_core::error::Error;
use archivist_core::types::{ImageRecord, SearchCacheEntry};

use crate::error::Result;

pub const MEGADOCS_DIR: &str = "megadocs";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MegadocReport {
    pub path: PathBuf,
    pub pages: usize,
    pub skipped: usize,
    /// Reused from an earlier run instead of being rendered again.
    pub cached: bool,
}

/// `<cache>/megadocs/<result file stem>.txt`
pub fn megadoc_path(cache_dir: &Path, entry: &SearchCacheEntry) -> PathBuf {
    let stem = Path::new(&entry.path).file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or_else(|| entry.id.clone());
    cache_dir.join(MEGADOCS_DIR).join(format!("{stem}.txt"))
}

/// Renders `results` in timestamp order. The document is written under an
/// `INCOMPLETE_` name and renamed once every page is out.
pub fn write_megadoc(results: &[ImageRecord], out_file: &Path, root_url: &str) -> Result<MegadocReport> {
    let dir = out_file.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).map_err(Error::from)?;
    let file_name = out_file
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| Error::Operation(format!("not a file path: {}", out_file.display())))?;
    let incomplete = dir.join(format!("INCOMPLETE_{file_name}"));
    info!(documents = results.len(), path = %out_file.display(), "Writing megadoc");

    let mut ordered: Vec<&ImageRecord> = results.iter().collect();
    ordered.sort_by_key(|r| r.timestamp);

    let mut sizes = AlbumSizes::new();
    let mut out = BufWriter::new(File::create(&incomplete).map_err(Error::from)?);
    let mut pages = 0;
    let mut skipped = 0;
    for (i, record) in ordered.iter().enumerate() {
        debug!("[{}/{}] {}", i + 1, ordered.len(), out_file.display());
        let content = match fs::read_to_string(&record.txt_path) {
            Ok(content) => content,
            Err(e) => {
                warn!(path = %record.txt_path, error = %e, "Transcript not readable, skipping page");
                skipped += 1;
                continue;
            }
        };
        if pages > 0 {
            out.write_all(b"\n\n\n").map_err(Error::from)?;
        }
        write_page(&mut out, record, &content, &mut sizes, root_url)?;
        pages += 1;
    }
    out.flush().map_err(Error::from)?;
    drop(out);

    fs::rename(&incomplete, out_file).map_err(Error::from)?;
    info!(pages, skipped, path = %out_file.display(), "Megadoc complete");
    Ok(MegadocReport { path: out_file.to_path_buf(), pages, skipped, cached: false })
}

fn write_page(out: &mut impl Write, record: &ImageRecord, content: &str, sizes: &mut AlbumSizes, root_url: &str) -> Result<()> {
    let album_size = sizes.size_of(record)?;
    let url = format!("{}/{}", root_url.trim_end_matches('/'), record.path.trim_start_matches('/'));
    write!(
        out,
        "---\ndate:  {}\nalbum: {} - {} of {}\nimage: {}\n---\n\n{}\n",
        record.timestamp_str, record.album_title, record.ordinal, album_size, url, content
    )
    .map_err(Error::from)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;
    use tempfile::TempDir;

    fn record(dir: &Path, ordinal: u32, at: &str, text: Option<&str>) -> ImageRecord {
        let album_path = dir.join("img/2023-07");
        fs::create_dir_all(&album_path).unwrap();
        let image = album_path.join(format!("{ordinal}_photo.jpg"));
        fs::write(&image, b"jpeg").unwrap();
        let txt_path = match text {
            Some(t) => {
                let p = dir.join(format!("{ordinal}.txt"));
                fs::write(&p, t).unwrap();
                p.to_string_lossy().to_string()
            }
            None => String::new(),
        };
        let timestamp = NaiveDateTime::parse_from_str(at, "%Y-%m-%d %H:%M").unwrap();
        ImageRecord {
            id: format!("id{ordinal}"),
            ordinal,
            title: "photo".into(),
            timestamp,
            timestamp_str: timestamp.format("%B %d, %Y").to_string(),
            path: image.to_string_lossy().to_string(),
            json_path: String::new(),
            txt_path,
            album: "2023-07".into(),
            album_title: "July 2023".into(),
            album_path: album_path.to_string_lossy().to_string(),
        }
    }

    #[test]
    fn renders_pages_in_timestamp_order_and_skips_missing_transcripts() {
        let tmp = TempDir::new().unwrap();
        let results = vec![
            record(tmp.path(), 2, "2023-07-05 10:00", Some("second page")),
            record(tmp.path(), 1, "2023-07-01 10:00", Some("first page")),
            record(tmp.path(), 3, "2023-07-09 10:00", None),
        ];
        let out = tmp.path().join("megadocs/result.txt");
        let report = write_megadoc(&results, &out, "https://photos.example/").unwrap();
        assert_eq!(report.pages, 2);
        assert_eq!(report.skipped, 1);
        assert!(!tmp.path().join("megadocs/INCOMPLETE_result.txt").exists());

        let text = fs::read_to_string(&out).unwrap();
        let first = text.find("first page").unwrap();
        let second = text.find("second page").unwrap();
        assert!(first < second);
        assert!(text.contains("album: July 2023 - 1 of 3\n"));
        assert!(text.contains("image: https://photos.example/"));
        assert!(text.starts_with("---\ndate:  July 01, 2023\n"));
    }

    #[test]
    fn megadoc_path_follows_result_file_stem() {
        let entry = SearchCacheEntry {
            id: "e1".into(),
            query_str: "storm".into(),
            timestamp: NaiveDateTime::default(),
            path: "/batch/cache/searches/2024-01-01_00-00-00_storm_abcd1234.json".into(),
            count: 0,
            complete: true,
            megadoc: None,
        };
        assert_eq!(
            megadoc_path(Path::new("/batch/cache"), &entry),
            PathBuf::from("/batch/cache/megadocs/2024-01-01_00-00-00_storm_abcd1234.txt")
        );
    }
}
