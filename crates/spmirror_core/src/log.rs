use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

pub const LOG_FILE_NAME: &str = "crawl.log";

/// Append-only free-text log under the mirror root, the durable record
/// of duplicate notices and per-link exceptions. Opened and closed per
/// call; the crawl is single threaded.
#[derive(Debug, Clone)]
pub struct NavigationLog {
    path: PathBuf,
}

impl NavigationLog {
    pub fn at_root(mirror_root: &Path) -> Self {
        Self {
            path: mirror_root.join(LOG_FILE_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn log(&self, message: &str) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open {}", self.path.display()))?;
        writeln!(file, "{message}")
            .with_context(|| format!("failed to append to {}", self.path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn log_appends_one_line_per_call() {
        let temp = tempdir().expect("tempdir");
        let log = NavigationLog::at_root(temp.path());
        log.log("duplicate: Home").expect("log");
        log.log("exception: Policies").expect("log");

        let content = fs::read_to_string(log.path()).expect("read log");
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines, vec!["duplicate: Home", "exception: Policies"]);
    }
}
