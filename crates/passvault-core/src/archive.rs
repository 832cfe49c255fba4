//! Archive step for export and backup files.
//!
//! After a file is written it is handed to an [`ArchiveHandler`]. The gzip
//! implementation compresses on the blocking thread pool and leaves the
//! original file in place.

use std::fs::File;
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::write::GzEncoder;
use tracing::info;

use crate::error::ArchiveError;

/// Produces a compressed copy of a written file.
#[async_trait::async_trait]
pub trait ArchiveHandler: Send + Sync + 'static {
    /// Archive `source` and return the archive path.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError`] if the archive could not be produced.
    async fn archive(&self, source: &Path) -> Result<PathBuf, ArchiveError>;
}

/// Writes `<file>.gz` next to the source file.
#[derive(Debug, Clone, Copy)]
pub struct GzipArchiver {
    level: Compression,
}

impl GzipArchiver {
    #[must_use]
    pub fn new(level: u32) -> Self {
        Self {
            level: Compression::new(level.min(9)),
        }
    }
}

impl Default for GzipArchiver {
    fn default() -> Self {
        Self {
            level: Compression::default(),
        }
    }
}

#[async_trait::async_trait]
impl ArchiveHandler for GzipArchiver {
    async fn archive(&self, source: &Path) -> Result<PathBuf, ArchiveError> {
        let source = source.to_path_buf();
        let mut target = source.clone().into_os_string();
        target.push(".gz");
        let target = PathBuf::from(target);
        let level = self.level;

        let written = {
            let source = source.clone();
            let target = target.clone();
            tokio::task::spawn_blocking(move || gzip_file(&source, &target, level))
                .await
                .map_err(|e| ArchiveError::Task {
                    reason: e.to_string(),
                })?
        }
        .map_err(|e| ArchiveError::Io {
            path: source.clone(),
            reason: e.to_string(),
        })?;

        info!(source = %source.display(), archive = %target.display(), bytes = written, "archive written");
        Ok(target)
    }
}

fn gzip_file(source: &Path, target: &Path, level: Compression) -> io::Result<u64> {
    let mut reader = BufReader::new(File::open(source)?);
    let writer = BufWriter::new(File::create(target)?);
    let mut encoder = GzEncoder::new(writer, level);
    let written = io::copy(&mut reader, &mut encoder)?;
    let mut writer = encoder.finish()?;
    io::Write::flush(&mut writer)?;
    Ok(written)
}
