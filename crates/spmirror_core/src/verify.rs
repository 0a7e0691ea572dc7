use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use scraper::{Html, Selector};
use walkdir::WalkDir;

/// Result of auditing a completed mirror tree: every saved page must
/// parse, and every relative link it carries must resolve to a file
/// the crawl actually produced.
#[derive(Debug, Default, Clone)]
pub struct VerifyReport {
    pub scanned_pages: usize,
    pub checked_links: usize,
    pub dangling: Vec<DanglingLink>,
}

#[derive(Debug, Clone)]
pub struct DanglingLink {
    pub page: PathBuf,
    pub href: String,
}

impl VerifyReport {
    pub fn is_clean(&self) -> bool {
        self.dangling.is_empty()
    }
}

/// Walk the mirror root and check every relative link in every saved
/// page against the tree on disk.
pub fn verify_mirror(mirror_root: &Path) -> Result<VerifyReport> {
    let anchors = Selector::parse("a")
        .map_err(|error| anyhow!("invalid anchor selector: {error}"))?;
    let mut report = VerifyReport::default();

    for entry in WalkDir::new(mirror_root).sort_by_file_name() {
        let entry = entry.context("failed to walk mirror tree")?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("html") {
            continue;
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let document = Html::parse_document(&content);
        report.scanned_pages += 1;

        let base = match path.parent() {
            Some(parent) => parent,
            None => continue,
        };
        for anchor in document.select(&anchors) {
            let href = match anchor.value().attr("href") {
                Some(href) => href,
                None => continue,
            };
            if !is_relative_link(href) {
                continue;
            }
            report.checked_links += 1;
            let target = resolve_relative(base, href);
            if !target.exists() {
                report.dangling.push(DanglingLink {
                    page: path.to_path_buf(),
                    href: href.to_string(),
                });
            }
        }
    }
    Ok(report)
}

fn is_relative_link(href: &str) -> bool {
    !(href.is_empty()
        || href.starts_with('#')
        || href.starts_with('/')
        || href.contains("://")
        || href.starts_with("mailto:"))
}

fn resolve_relative(base: &Path, href: &str) -> PathBuf {
    let without_fragment = href.split(['#', '?']).next().unwrap_or(href);
    let mut path = base.to_path_buf();
    for segment in without_fragment.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                path.pop();
            }
            other => path.push(other),
        }
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn clean_mirror_reports_no_dangling_links() {
        let temp = tempdir().expect("tempdir");
        let home = temp.path().join("Home");
        let policies = home.join("Policies");
        fs::create_dir_all(&policies).expect("create dirs");
        fs::write(
            home.join("Home.html"),
            "<html><body><a href=\"./Policies/Policies.html\">Policies</a></body></html>",
        )
        .expect("write home");
        fs::write(
            policies.join("Policies.html"),
            "<html><body><p>rules</p></body></html>",
        )
        .expect("write policies");

        let report = verify_mirror(temp.path()).expect("verify");
        assert_eq!(report.scanned_pages, 2);
        assert_eq!(report.checked_links, 1);
        assert!(report.is_clean());
    }

    #[test]
    fn dangling_relative_link_is_reported() {
        let temp = tempdir().expect("tempdir");
        let home = temp.path().join("Home");
        fs::create_dir_all(&home).expect("create dirs");
        fs::write(
            home.join("Home.html"),
            "<html><body>\
             <a href=\"./Ghost/Ghost.html\">Ghost</a>\
             <a href=\"https://contoso.example/w/Home.aspx\">legacy</a>\
             </body></html>",
        )
        .expect("write home");

        let report = verify_mirror(temp.path()).expect("verify");
        assert_eq!(report.checked_links, 1);
        assert_eq!(report.dangling.len(), 1);
        assert_eq!(report.dangling[0].href, "./Ghost/Ghost.html");
    }

    #[test]
    fn parent_relative_links_resolve_through_the_tree() {
        let temp = tempdir().expect("tempdir");
        let stub_dir = temp.path().join("Home/Policies/Home");
        fs::create_dir_all(&stub_dir).expect("create dirs");
        fs::write(temp.path().join("Home/Home.html"), "<html></html>").expect("write canonical");
        fs::write(
            stub_dir.join("Home.html"),
            "<html><body><a href=\"../../Home.html\">canonical</a></body></html>",
        )
        .expect("write stub");

        let report = verify_mirror(temp.path()).expect("verify");
        assert!(report.is_clean());
    }
}
