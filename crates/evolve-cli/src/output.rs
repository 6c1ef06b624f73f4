//! Result files written under the results directory.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

/// Local wall-clock stamp used in every result file name.
pub fn timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%d-%H-%M-%S").to_string()
}

pub struct ResultsDir {
    root: PathBuf,
}

impl ResultsDir {
    pub fn create(root: &Path) -> Result<Self> {
        std::fs::create_dir_all(root)
            .with_context(|| format!("create results dir {}", root.display()))?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    pub fn path(&self, file_name: &str) -> PathBuf {
        self.root.join(file_name)
    }

    /// Write `value` as pretty JSON to `file_name`.
    pub fn write_json<T: Serialize>(&self, file_name: &str, value: &T) -> Result<PathBuf> {
        let path = self.path(file_name);
        let content = serde_json::to_string_pretty(value).context("serialize results")?;
        std::fs::write(&path, content).with_context(|| format!("write {}", path.display()))?;
        Ok(path)
    }

    /// Append `line` and flush, so partial sweeps leave usable summaries.
    pub fn append_line(&self, file_name: &str, line: &str) -> Result<PathBuf> {
        let path = self.path(file_name);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("open {}", path.display()))?;
        writeln!(file, "{line}").with_context(|| format!("append to {}", path.display()))?;
        file.sync_data().ok();
        Ok(path)
    }
}
