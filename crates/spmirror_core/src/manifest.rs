use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use crate::crawler::VisitedPage;

pub const MANIFEST_FILE_NAME: &str = "manifest.json";

/// Write the visited-page sequence to `manifest.json` at the mirror
/// root, preserving crawl order (the order carries the first-wins
/// duplicate precedence).
pub fn write_manifest(mirror_root: &Path, visited: &[VisitedPage]) -> Result<()> {
    let path = mirror_root.join(MANIFEST_FILE_NAME);
    let rendered =
        serde_json::to_string_pretty(visited).context("failed to serialize crawl manifest")?;
    fs::write(&path, rendered).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

pub fn read_manifest(mirror_root: &Path) -> Result<Vec<VisitedPage>> {
    let path = mirror_root.join(MANIFEST_FILE_NAME);
    let content = fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let visited: Vec<VisitedPage> = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(visited)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::tempdir;

    #[test]
    fn manifest_round_trips_in_order() {
        let temp = tempdir().expect("tempdir");
        let visited = vec![
            VisitedPage {
                page_name: "Home".to_string(),
                local_path: PathBuf::from("/m/Home/Home.html"),
                source_url: "https://contoso.example/w/Home.aspx".to_string(),
            },
            VisitedPage {
                page_name: "Policies".to_string(),
                local_path: PathBuf::from("/m/Home/Policies/Policies.html"),
                source_url: "https://contoso.example/w/Policies.aspx".to_string(),
            },
        ];

        write_manifest(temp.path(), &visited).expect("write");
        let loaded = read_manifest(temp.path()).expect("read");
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].page_name, "Home");
        assert_eq!(loaded[1].source_url, "https://contoso.example/w/Policies.aspx");
    }
}
