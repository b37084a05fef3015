//! JSON result files

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use serde::Serialize;
use serde_json::ser::{PrettyFormatter, Serializer};
use tracing::{error, info};

use crate::Result;

/// Prefix of auto-named result files
pub const RESULTS_PREFIX: &str = "foscos_results";

/// `<prefix>_YYYYMMDD_HHMMSS.json` in local time
pub fn timestamped_name(prefix: &str) -> String {
    format!("{}_{}.json", prefix, Local::now().format("%Y%m%d_%H%M%S"))
}

/// Writes pretty-printed (4-space) JSON files under one directory
#[derive(Debug, Clone)]
pub struct ResultStore {
    dir: PathBuf,
}

impl ResultStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Save `data`, logging instead of failing on write errors.
    ///
    /// Without a filename the file is named after the current timestamp.
    /// Returns the target path either way.
    pub fn save<T: Serialize + ?Sized>(&self, data: &T, filename: Option<&str>) -> PathBuf {
        let name = filename
            .map(str::to_string)
            .unwrap_or_else(|| timestamped_name(RESULTS_PREFIX));
        let path = self.dir.join(name);

        match self.write(data, &path) {
            Ok(()) => info!("Results saved to: {}", path.display()),
            Err(e) => error!("Error saving results to {}: {}", path.display(), e),
        }

        path
    }

    fn write<T: Serialize + ?Sized>(&self, data: &T, path: &Path) -> Result<()> {
        fs::create_dir_all(&self.dir)?;

        let mut buf = Vec::new();
        let mut ser = Serializer::with_formatter(&mut buf, PrettyFormatter::with_indent(b"    "));
        data.serialize(&mut ser)?;

        fs::write(path, buf)?;
        Ok(())
    }
}
