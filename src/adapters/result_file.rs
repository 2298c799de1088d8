//! Sweep result files.
//!
//! One JSON document per experiment, named after its label
//! (`<chemical>_<concentration>_<n>.json`, unsafe characters replaced),
//! holding the label, the frequency column and every fetched trace.

use std::fs;
use std::path::{Path, PathBuf};

use log::{error, info};
use serde::Serialize;

use crate::app::events::ExperimentLabel;
use crate::app::ports::ResultSink;
use crate::error::{Error, Result};
use crate::vna::SweepResult;

#[derive(Serialize)]
struct ResultFile<'a> {
    label: &'a ExperimentLabel,
    #[serde(flatten)]
    result: &'a SweepResult,
}

pub struct JsonResultSink {
    dir: PathBuf,
    written: Vec<PathBuf>,
}

impl JsonResultSink {
    /// Results go under `dir`, which is created if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| {
            error!("Cannot create output directory {}: {}", dir.display(), e);
            Error::Storage(e.kind())
        })?;
        Ok(Self {
            dir,
            written: Vec::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Files written so far, in order.
    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }
}

impl ResultSink for JsonResultSink {
    fn accept(&mut self, label: &ExperimentLabel, result: SweepResult) -> Result<()> {
        let path = self.dir.join(file_name(label));
        let doc = ResultFile {
            label,
            result: &result,
        };
        let json = serde_json::to_vec(&doc).map_err(|e| Error::Storage(std::io::Error::from(e).kind()))?;
        fs::write(&path, json).map_err(|e| {
            error!("Failed to write {}: {}", path.display(), e);
            Error::Storage(e.kind())
        })?;
        info!("Saved {} points to {}", result.len(), path.display());
        self.written.push(path);
        Ok(())
    }
}

/// `<label>.json` with anything but ASCII letters, digits, `-`, `_` and
/// `.` replaced by `_`, so the file always lands directly in the output
/// directory.
fn file_name(label: &ExperimentLabel) -> String {
    let stem: String = label
        .to_string()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '_' })
        .collect();
    format!("{stem}.json")
}
