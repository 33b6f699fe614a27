//! Per-run working directories.
//!
//! A run lives in `{data_dir}/{YYYYmmdd_HHMMSS}_{target}` and holds the page
//! snapshots (`items_page_{n}.html`) and the parsed `listings.json`. Phases
//! that run as separate invocations find their run through this naming.

use chrono::{Duration as ChronoDuration, NaiveDateTime};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::{AppError, Result};

const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";
const TIMESTAMP_LEN: usize = 15;
const PAGE_FILE_PREFIX: &str = "items_page_";
const PAGE_FILE_SUFFIX: &str = ".html";
const FULL_PAGE_DIR: &str = "full_page";
pub const LISTINGS_FILE: &str = "listings.json";

// Collisions within the same second move the stamp forward.
const MAX_ALLOCATION_ATTEMPTS: i64 = 60;

pub fn run_name(at: NaiveDateTime, target: &str) -> String {
    format!("{}_{}", at.format(TIMESTAMP_FORMAT), target)
}

/// The target key of a run directory name, if it follows the naming scheme.
fn run_target(name: &str) -> Option<&str> {
    if name.len() <= TIMESTAMP_LEN + 1 || !name.is_char_boundary(TIMESTAMP_LEN) {
        return None;
    }

    let (stamp, rest) = name.split_at(TIMESTAMP_LEN);
    NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT).ok()?;
    rest.strip_prefix('_').filter(|target| !target.is_empty())
}

#[derive(Debug, Clone)]
pub struct RunDir {
    name: String,
    path: PathBuf,
}

impl RunDir {
    /// Creates a fresh, uniquely named run directory.
    pub fn allocate(data_dir: &Path, target: &str, at: NaiveDateTime) -> Result<Self> {
        fs::create_dir_all(data_dir)?;

        for offset in 0..MAX_ALLOCATION_ATTEMPTS {
            let name = run_name(at + ChronoDuration::seconds(offset), target);
            let path = data_dir.join(&name);

            match fs::create_dir(&path) {
                Ok(()) => {
                    info!("Allocated run directory {}", path.display());
                    return Ok(Self { name, path });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Err(AppError::Internal(format!(
            "Could not allocate a run directory for {} in {}",
            target,
            data_dir.display()
        )))
    }

    pub fn open(data_dir: &Path, name: &str) -> Result<Self> {
        let path = data_dir.join(name);
        if !path.is_dir() {
            return Err(AppError::NotFound {
                resource: format!("run directory {}", path.display()),
            });
        }

        Ok(Self {
            name: name.to_string(),
            path,
        })
    }

    /// The most recent run for `target`, by timestamp prefix.
    pub fn latest(data_dir: &Path, target: &str) -> Result<Option<Self>> {
        let entries = match fs::read_dir(data_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut latest: Option<String> = None;
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if run_target(&name) != Some(target) {
                continue;
            }
            if latest.as_deref().map_or(true, |current| name.as_str() > current) {
                latest = Some(name);
            }
        }

        Ok(latest.map(|name| Self {
            path: data_dir.join(&name),
            name,
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn target(&self) -> Option<&str> {
        run_target(&self.name)
    }

    pub fn page_path(&self, page: u32) -> PathBuf {
        self.path
            .join(format!("{}{}{}", PAGE_FILE_PREFIX, page, PAGE_FILE_SUFFIX))
    }

    pub fn full_page_path(&self, page: u32) -> PathBuf {
        self.path
            .join(FULL_PAGE_DIR)
            .join(format!("{}{}{}", PAGE_FILE_PREFIX, page, PAGE_FILE_SUFFIX))
    }

    pub fn listings_path(&self) -> PathBuf {
        self.path.join(LISTINGS_FILE)
    }

    pub fn write_page(&self, page: u32, html: &str) -> Result<PathBuf> {
        let path = self.page_path(page);
        fs::write(&path, html)?;
        debug!("Saved page {} to {}", page, path.display());
        Ok(path)
    }

    pub fn write_full_page(&self, page: u32, html: &str) -> Result<PathBuf> {
        let path = self.full_page_path(page);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, html)?;
        Ok(path)
    }

    /// Saved container snapshots, in page order.
    pub fn page_files(&self) -> Result<Vec<(u32, PathBuf)>> {
        let mut pages = Vec::new();

        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };

            let number = name
                .strip_prefix(PAGE_FILE_PREFIX)
                .and_then(|rest| rest.strip_suffix(PAGE_FILE_SUFFIX))
                .and_then(|n| n.parse::<u32>().ok());

            if let Some(number) = number {
                pages.push((number, entry.path()));
            }
        }

        pages.sort_by_key(|(number, _)| *number);
        Ok(pages)
    }

    pub fn has_files(&self) -> Result<bool> {
        contains_files(&self.path)
    }

    /// Removes the directory if it holds no files. Returns whether it was kept.
    pub fn finalize(&self) -> Result<bool> {
        if !self.path.exists() {
            return Ok(false);
        }

        if self.has_files()? {
            info!("Keeping run directory {}", self.path.display());
            return Ok(true);
        }

        warn!("Run directory {} is empty, removing it", self.path.display());
        fs::remove_dir_all(&self.path)?;
        Ok(false)
    }
}

fn contains_files(dir: &Path) -> Result<bool> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            if contains_files(&entry.path())? {
                return Ok(true);
            }
        } else {
            return Ok(true);
        }
    }
    Ok(false)
}
