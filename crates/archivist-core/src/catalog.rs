//! Metadata indexer: scans an image tree and produces the ordered catalog.

use chrono::{Local, NaiveDate, NaiveDateTime};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::{resolve_with_base, BatchSettings};
use crate::error::{Error, Result};
use crate::persist::{read_json, write_json_atomic};
use crate::types::{Catalog, ImageRecord, CATALOG_SCHEMA};

/// Catalog file name inside the cache directory.
pub const CATALOG_FILE: &str = "index.json";

const TIMESTAMP_DISPLAY: &str = "%B %d, %Y at %-I:%M %p";

/// Where the pieces of one batch live on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchLayout {
    /// Name recorded in the catalog.
    pub name: String,
    /// One subdirectory per album, images directly inside.
    pub image_root: PathBuf,
    /// `<album>/json/<stem>.json` and `<album>/txt/<stem>.txt` live here.
    pub sidecar_root: PathBuf,
    pub cache_dir: PathBuf,
}

impl BatchLayout {
    /// Images in `<batch>/../img`, sidecars in `<batch>`, cache in `<batch>/cache`.
    pub fn for_batch(batch: &Path) -> Self {
        let parent = batch.parent().map(Path::to_path_buf).unwrap_or_default();
        Self {
            name: batch_name(batch),
            image_root: parent.join("img"),
            sidecar_root: batch.to_path_buf(),
            cache_dir: batch.join("cache"),
        }
    }

    /// Legacy layout for `settings.path`, with any configured root overriding it.
    /// Relative paths resolve against `base`.
    pub fn from_settings(settings: &BatchSettings, base: &Path) -> Self {
        let batch = resolve_with_base(base, &settings.path);
        let mut layout = Self::for_batch(&batch);
        if let Some(p) = &settings.image_root {
            layout.image_root = resolve_with_base(base, p);
        }
        if let Some(p) = &settings.sidecar_root {
            layout.sidecar_root = resolve_with_base(base, p);
        }
        if let Some(p) = &settings.cache_dir {
            layout.cache_dir = resolve_with_base(base, p);
        }
        layout
    }

    pub fn catalog_file(&self) -> PathBuf {
        self.cache_dir.join(CATALOG_FILE)
    }
}

fn batch_name(batch: &Path) -> String {
    batch.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default()
}

/// Fields recovered from `<ordinal>_<YYYY-MM-DD>_<HH-MM-SS>_<title>.<ext>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedName {
    pub ordinal: u32,
    pub timestamp: NaiveDateTime,
    pub title: String,
}

pub fn parse_image_name(file_name: &str) -> Result<ParsedName> {
    let invalid = |reason: &str| Error::InvalidFilename { name: file_name.to_string(), reason: reason.to_string() };
    let stem = Path::new(file_name).file_stem().and_then(|s| s.to_str()).ok_or_else(|| invalid("no file stem"))?;
    let parts: Vec<&str> = stem.split('_').collect();
    if parts.len() < 4 {
        return Err(invalid("expected <ordinal>_<date>_<time>_<title>"));
    }
    let ordinal: u32 = parts[0].parse().map_err(|_| invalid("ordinal is not a number"))?;
    if ordinal == 0 {
        return Err(invalid("ordinal must start at 1"));
    }
    let timestamp = NaiveDateTime::parse_from_str(&format!("{} {}", parts[1], parts[2]), "%Y-%m-%d %H-%M-%S")
        .map_err(|_| invalid("date/time must be YYYY-MM-DD_HH-MM-SS"))?;
    let title = parts[3..].join("_");
    if title.is_empty() {
        return Err(invalid("empty title"));
    }
    Ok(ParsedName { ordinal, timestamp, title })
}

/// "2023-07", "2023_07", "2023-07-01" or "July 2023" -> "July 2023".
pub fn album_title(album: &str) -> Option<String> {
    let candidates = [
        (format!("{album}-01"), "%Y-%m-%d"),
        (format!("{album}_01"), "%Y_%m_%d"),
        (album.to_string(), "%Y-%m-%d"),
        (format!("1 {album}"), "%d %B %Y"),
    ];
    candidates
        .iter()
        .find_map(|(text, fmt)| NaiveDate::parse_from_str(text, fmt).ok())
        .map(|d| d.format("%B %Y").to_string())
}

/// Deterministic record id: rebuilding the catalog keeps ids stable.
pub fn record_id(album: &str, ordinal: u32, file_name: &str) -> String {
    let key = format!("{album}/{ordinal}/{file_name}");
    blake3::hash(key.as_bytes()).to_hex()[..32].to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogReport {
    pub images: usize,
    pub skipped_names: usize,
    pub missing_json: usize,
    pub missing_txt: usize,
}

#[derive(Debug, Clone)]
pub struct CatalogBuilder {
    layout: BatchLayout,
}

impl CatalogBuilder {
    pub fn new(layout: BatchLayout) -> Self { Self { layout } }

    /// Builds the catalog from scratch. Bad filenames and missing sidecars
    /// are logged and tolerated; a missing image root is an error.
    pub fn build(&self) -> Result<(Catalog, CatalogReport)> {
        let image_root = fs::canonicalize(&self.layout.image_root)
            .map_err(|_| Error::NotFound(format!("image root {}", self.layout.image_root.display())))?;
        let sidecar_root = fs::canonicalize(&self.layout.sidecar_root).unwrap_or_else(|_| self.layout.sidecar_root.clone());

        info!(batch = %self.layout.name, root = %image_root.display(), "Loading images");
        let files = list_image_files(&image_root);
        info!(count = files.len(), "Found images, indexing metadata");

        let mut report = CatalogReport::default();
        let mut images = Vec::with_capacity(files.len());
        for (i, file) in files.iter().enumerate() {
            debug!("[{}/{}] {}", i + 1, files.len(), file.display());
            match self.load_record(file, &sidecar_root, &mut report) {
                Ok(record) => images.push(record),
                Err(e) => {
                    warn!(path = %file.display(), error = %e, "Skipping image");
                    report.skipped_names += 1;
                }
            }
        }
        report.images = images.len();

        let catalog = Catalog {
            schema: CATALOG_SCHEMA.to_string(),
            id: uuid::Uuid::new_v4().to_string(),
            batch: self.layout.name.clone(),
            cache_path: self.layout.cache_dir.to_string_lossy().to_string(),
            timestamp: Local::now().naive_local(),
            images,
        };
        info!(
            images = report.images,
            skipped = report.skipped_names,
            missing_json = report.missing_json,
            missing_txt = report.missing_txt,
            "Catalog built"
        );
        Ok((catalog, report))
    }

    fn load_record(&self, file: &Path, sidecar_root: &Path, report: &mut CatalogReport) -> Result<ImageRecord> {
        let file_name = file.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
        let parsed = parse_image_name(&file_name)?;
        let stem = file.file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or_default();
        let album_path = file.parent().map(Path::to_path_buf).unwrap_or_default();
        let album = album_path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
        let album_title = album_title(&album).unwrap_or_else(|| {
            warn!(album = %album, "Album name is not a month/year, using it as the title");
            album.clone()
        });

        let json = sidecar(sidecar_root, &album, "json", &stem);
        if json.is_empty() {
            report.missing_json += 1;
        }
        let txt = sidecar(sidecar_root, &album, "txt", &stem);
        if txt.is_empty() {
            report.missing_txt += 1;
        }

        Ok(ImageRecord {
            id: record_id(&album, parsed.ordinal, &file_name),
            ordinal: parsed.ordinal,
            title: parsed.title,
            timestamp_str: parsed.timestamp.format(TIMESTAMP_DISPLAY).to_string(),
            timestamp: parsed.timestamp,
            path: file.to_string_lossy().to_string(),
            json_path: json,
            txt_path: txt,
            album,
            album_title,
            album_path: album_path.to_string_lossy().to_string(),
        })
    }
}

/// Sidecar path as a string, or empty when the file does not exist.
fn sidecar(root: &Path, album: &str, kind: &str, stem: &str) -> String {
    let path = root.join(album).join(kind).join(format!("{stem}.{kind}"));
    if path.is_file() {
        path.to_string_lossy().to_string()
    } else {
        warn!(path = %path.display(), "File not found");
        String::new()
    }
}

/// Files directly inside album directories, natural order over the relative path.
fn list_image_files(root: &Path) -> Vec<PathBuf> {
    let mut files: Vec<(String, PathBuf)> = walkdir::WalkDir::new(root)
        .min_depth(2)
        .max_depth(2)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            let name = e.file_name().to_string_lossy();
            !name.starts_with('.') && e.path().extension().is_some()
        })
        .map(|e| {
            let rel = e.path().strip_prefix(root).unwrap_or(e.path()).to_string_lossy().to_string();
            (rel, e.into_path())
        })
        .collect();
    files.sort_by(|a, b| natord::compare(&a.0, &b.0));
    files.into_iter().map(|(_, p)| p).collect()
}

impl Catalog {
    pub fn save(&self, path: &Path) -> Result<()> {
        write_json_atomic(path, self)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let catalog: Catalog = read_json(path)?;
        if catalog.schema != CATALOG_SCHEMA {
            return Err(Error::InvalidConfig(format!(
                "{} has schema '{}', expected '{}'",
                path.display(),
                catalog.schema,
                CATALOG_SCHEMA
            )));
        }
        Ok(catalog)
    }

    pub fn lookup(&self) -> CatalogLookup<'_> {
        CatalogLookup::new(self)
    }
}

/// Identifier -> record map, built once per query session.
pub struct CatalogLookup<'a> {
    by_id: HashMap<&'a str, &'a ImageRecord>,
}

impl<'a> CatalogLookup<'a> {
    pub fn new(catalog: &'a Catalog) -> Self {
        let by_id = catalog.images.iter().map(|r| (r.id.as_str(), r)).collect();
        Self { by_id }
    }

    /// An unknown id means the index and catalog diverged.
    pub fn resolve(&self, id: &str) -> Result<&'a ImageRecord> {
        self.by_id.get(id).copied().ok_or_else(|| Error::ConsistencyFault { id: id.to_string() })
    }

    pub fn len(&self) -> usize { self.by_id.len() }

    pub fn is_empty(&self) -> bool { self.by_id.is_empty() }
}
