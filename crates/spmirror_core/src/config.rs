use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

pub const DEFAULT_USER_AGENT: &str = "spmirror/0.3";
pub const DEFAULT_PAGE_EXTENSION: &str = ".aspx";
pub const DEFAULT_BROKEN_LINK_CLASS: &str = "ms-missinglink";

const DEFAULT_SETTLE_DELAY_MS: u64 = 500;
const DEFAULT_READY_TIMEOUT_MS: u64 = 15_000;
const DEFAULT_POLL_INTERVAL_MS: u64 = 250;
const DEFAULT_MAX_DEPTH: usize = 64;
const DEFAULT_HTTP_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_HTTP_RETRIES: usize = 2;
const DEFAULT_RETRY_DELAY_MS: u64 = 350;

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct MirrorConfig {
    #[serde(default)]
    pub site: SiteSection,
    #[serde(default)]
    pub crawl: CrawlSection,
}

/// `[site]` — where the wiki lives and how its pages are shaped.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct SiteSection {
    pub site_url: Option<String>,
    pub wiki_base_path: Option<String>,
    pub wiki_home_path: Option<String>,
    pub asset_base_path: Option<String>,
    pub legacy_url_prefix: Option<String>,
    pub page_extension: Option<String>,
    pub title_element_id: Option<String>,
    pub content_element_id: Option<String>,
    pub broken_link_class: Option<String>,
    #[serde(default)]
    pub excluded_urls: Vec<String>,
    #[serde(default)]
    pub error_titles: Vec<String>,
}

/// `[crawl]` — pacing, limits and the asset HTTP client.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct CrawlSection {
    pub settle_delay_ms: Option<u64>,
    pub ready_timeout_ms: Option<u64>,
    pub poll_interval_ms: Option<u64>,
    pub max_depth: Option<usize>,
    pub user_agent: Option<String>,
    pub http_timeout_ms: Option<u64>,
    pub http_retries: Option<usize>,
    pub retry_delay_ms: Option<u64>,
}

impl MirrorConfig {
    /// Resolve the site base URL: env SPMIRROR_SITE_URL > config.
    pub fn site_url(&self) -> Result<String> {
        if let Some(value) = env_string("SPMIRROR_SITE_URL") {
            return Ok(value);
        }
        match &self.site.site_url {
            Some(url) => Ok(url.trim_end_matches('/').to_string()),
            None => bail!("site_url is not configured (set [site].site_url or SPMIRROR_SITE_URL)"),
        }
    }

    /// Resolve the wiki section base path: env SPMIRROR_WIKI_BASE_PATH > config.
    pub fn wiki_base_path(&self) -> Result<String> {
        if let Some(value) = env_string("SPMIRROR_WIKI_BASE_PATH") {
            return Ok(value);
        }
        match &self.site.wiki_base_path {
            Some(path) => Ok(normalize_path_segment(path)),
            None => bail!("wiki_base_path is not configured"),
        }
    }

    pub fn wiki_home_path(&self) -> Result<String> {
        if let Some(value) = env_string("SPMIRROR_WIKI_HOME_PATH") {
            return Ok(value);
        }
        match &self.site.wiki_home_path {
            Some(path) => Ok(path.trim_start_matches('/').to_string()),
            None => bail!("wiki_home_path is not configured"),
        }
    }

    pub fn asset_base_path(&self) -> String {
        self.site
            .asset_base_path
            .as_deref()
            .map(normalize_path_segment)
            .unwrap_or_default()
    }

    pub fn legacy_url_prefix(&self) -> Option<String> {
        self.site
            .legacy_url_prefix
            .as_ref()
            .map(|prefix| prefix.trim_end_matches('/').to_string())
            .filter(|prefix| !prefix.is_empty())
    }

    pub fn page_extension(&self) -> &str {
        self.site
            .page_extension
            .as_deref()
            .unwrap_or(DEFAULT_PAGE_EXTENSION)
    }

    pub fn title_element_id(&self) -> Result<&str> {
        match self.site.title_element_id.as_deref() {
            Some(id) if !id.trim().is_empty() => Ok(id),
            _ => bail!("title_element_id is not configured"),
        }
    }

    pub fn content_element_id(&self) -> Result<&str> {
        match self.site.content_element_id.as_deref() {
            Some(id) if !id.trim().is_empty() => Ok(id),
            _ => bail!("content_element_id is not configured"),
        }
    }

    pub fn broken_link_class(&self) -> &str {
        self.site
            .broken_link_class
            .as_deref()
            .unwrap_or(DEFAULT_BROKEN_LINK_CLASS)
    }

    pub fn error_titles(&self) -> Vec<String> {
        if self.site.error_titles.is_empty() {
            return vec!["Page not found".to_string(), "Error".to_string()];
        }
        self.site.error_titles.clone()
    }

    pub fn settle_delay_ms(&self) -> u64 {
        self.crawl.settle_delay_ms.unwrap_or(DEFAULT_SETTLE_DELAY_MS)
    }

    pub fn ready_timeout_ms(&self) -> u64 {
        self.crawl.ready_timeout_ms.unwrap_or(DEFAULT_READY_TIMEOUT_MS)
    }

    pub fn poll_interval_ms(&self) -> u64 {
        self.crawl.poll_interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS)
    }

    pub fn max_depth(&self) -> usize {
        self.crawl.max_depth.unwrap_or(DEFAULT_MAX_DEPTH)
    }

    pub fn user_agent(&self) -> String {
        if let Some(value) = env_string("SPMIRROR_USER_AGENT") {
            return value;
        }
        self.crawl
            .user_agent
            .clone()
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
    }

    pub fn http_timeout_ms(&self) -> u64 {
        self.crawl.http_timeout_ms.unwrap_or(DEFAULT_HTTP_TIMEOUT_MS)
    }

    pub fn http_retries(&self) -> usize {
        self.crawl.http_retries.unwrap_or(DEFAULT_HTTP_RETRIES)
    }

    pub fn retry_delay_ms(&self) -> u64 {
        self.crawl.retry_delay_ms.unwrap_or(DEFAULT_RETRY_DELAY_MS)
    }

    /// Absolute URL of the crawl entry page: site + wiki base + home page.
    pub fn root_url(&self) -> Result<String> {
        Ok(format!(
            "{}{}{}",
            self.site_url()?,
            self.wiki_base_path()?,
            self.wiki_home_path()?
        ))
    }

    /// Absolute URL prefix under which wiki pages live.
    pub fn wiki_page_base(&self) -> Result<String> {
        Ok(format!("{}{}", self.site_url()?, self.wiki_base_path()?))
    }

    /// Absolute URL prefix under which page assets live. Empty when no
    /// asset library is configured.
    pub fn asset_url_base(&self) -> Result<String> {
        let path = self.asset_base_path();
        if path.is_empty() {
            return Ok(String::new());
        }
        Ok(format!("{}{}", self.site_url()?, path))
    }

    /// Resolve a raw href against the site base. Absolute hrefs pass
    /// through; anything else is treated as site-rooted.
    pub fn resolve_url(&self, href: &str) -> Result<String> {
        let trimmed = href.trim();
        if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            return Ok(trimmed.to_string());
        }
        if trimmed.starts_with('/') {
            return Ok(format!("{}{}", self.site_url()?, trimmed));
        }
        Ok(format!("{}/{}", self.site_url()?, trimmed))
    }

    /// Whether a resolved URL is a member of the static exclusion set.
    pub fn is_excluded(&self, url: &str) -> bool {
        let normalized = url.trim_end_matches('/');
        self.site
            .excluded_urls
            .iter()
            .any(|excluded| excluded.trim_end_matches('/') == normalized)
    }

    /// Local mirror root derived from the site host and wiki path, the
    /// way the produced tree is rooted: `<host>/<wiki path>` under
    /// `base_dir`.
    pub fn mirror_root(&self, base_dir: &Path) -> Result<PathBuf> {
        let site = self.site_url()?;
        let host_and_path = site
            .trim_start_matches("https://")
            .trim_start_matches("http://");
        let mut root = base_dir.to_path_buf();
        for segment in host_and_path.split('/').filter(|s| !s.is_empty()) {
            root.push(segment);
        }
        for segment in self
            .wiki_base_path()?
            .split('/')
            .filter(|s| !s.is_empty())
        {
            root.push(segment);
        }
        Ok(root)
    }
}

/// Load a MirrorConfig from a TOML file. Returns default if the file
/// doesn't exist.
pub fn load_config(config_path: &Path) -> Result<MirrorConfig> {
    if !config_path.exists() {
        return Ok(MirrorConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: MirrorConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

fn env_string(key: &str) -> Option<String> {
    let value = env::var(key).ok()?;
    let trimmed = value.trim().to_string();
    if trimmed.is_empty() { None } else { Some(trimmed) }
}

/// Ensure a path segment has exactly one leading and one trailing slash.
fn normalize_path_segment(path: &str) -> String {
    let trimmed = path.trim().trim_matches('/');
    if trimmed.is_empty() {
        return "/".to_string();
    }
    format!("/{trimmed}/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_config() -> MirrorConfig {
        MirrorConfig {
            site: SiteSection {
                site_url: Some("https://contoso.sharepoint.example".to_string()),
                wiki_base_path: Some("/sites/team/WikiPages/".to_string()),
                wiki_home_path: Some("Home.aspx".to_string()),
                asset_base_path: Some("/sites/team/SiteAssets/".to_string()),
                legacy_url_prefix: Some("https://legacy.contoso.example".to_string()),
                excluded_urls: vec!["https://contoso.sharepoint.example/sites/team".to_string()],
                ..SiteSection::default()
            },
            crawl: CrawlSection::default(),
        }
    }

    #[test]
    fn missing_site_url_is_an_error() {
        let config = MirrorConfig::default();
        let error = config.site_url().expect_err("must fail");
        assert!(error.to_string().contains("site_url"));
    }

    #[test]
    fn load_config_returns_default_for_missing_file() {
        let config = load_config(Path::new("/nonexistent/spmirror.toml")).expect("load config");
        assert!(config.site.site_url.is_none());
        assert_eq!(config.max_depth(), DEFAULT_MAX_DEPTH);
    }

    #[test]
    fn load_config_parses_site_and_crawl_sections() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("spmirror.toml");
        fs::write(
            &config_path,
            r#"
[site]
site_url = "https://contoso.sharepoint.example"
wiki_base_path = "/sites/team/WikiPages/"
wiki_home_path = "Home.aspx"
asset_base_path = "/sites/team/SiteAssets/"
title_element_id = "pageTitle"
content_element_id = "contentBox"
excluded_urls = ["https://contoso.sharepoint.example/sites/team"]

[crawl]
max_depth = 12
settle_delay_ms = 0
"#,
        )
        .expect("write config");

        let config = load_config(&config_path).expect("load config");
        assert_eq!(
            config.site_url().expect("site url"),
            "https://contoso.sharepoint.example"
        );
        assert_eq!(config.title_element_id().expect("id"), "pageTitle");
        assert_eq!(config.max_depth(), 12);
        assert_eq!(config.settle_delay_ms(), 0);
    }

    #[test]
    fn load_config_returns_error_for_invalid_toml() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("spmirror.toml");
        fs::write(&config_path, "[site\nsite_url = \"oops\"").expect("write config");
        let error = load_config(&config_path).expect_err("must fail");
        assert!(error.to_string().contains("failed to parse"));
    }

    #[test]
    fn root_url_joins_site_base_and_home() {
        let config = sample_config();
        assert_eq!(
            config.root_url().expect("root url"),
            "https://contoso.sharepoint.example/sites/team/WikiPages/Home.aspx"
        );
    }

    #[test]
    fn resolve_url_handles_relative_and_absolute_hrefs() {
        let config = sample_config();
        assert_eq!(
            config.resolve_url("/sites/team/WikiPages/Policies.aspx").expect("resolve"),
            "https://contoso.sharepoint.example/sites/team/WikiPages/Policies.aspx"
        );
        assert_eq!(
            config.resolve_url("https://elsewhere.example/a").expect("resolve"),
            "https://elsewhere.example/a"
        );
    }

    #[test]
    fn exclusion_matching_ignores_trailing_slash() {
        let config = sample_config();
        assert!(config.is_excluded("https://contoso.sharepoint.example/sites/team/"));
        assert!(!config.is_excluded("https://contoso.sharepoint.example/sites/other"));
    }

    #[test]
    fn mirror_root_mirrors_host_and_wiki_path() {
        let config = sample_config();
        let root = config.mirror_root(Path::new("/tmp/mirrors")).expect("root");
        assert_eq!(
            root,
            PathBuf::from("/tmp/mirrors/contoso.sharepoint.example/sites/team/WikiPages")
        );
    }

    #[test]
    fn default_error_titles_cover_not_found() {
        let config = MirrorConfig::default();
        let titles = config.error_titles();
        assert!(titles.iter().any(|t| t == "Page not found"));
    }

    #[test]
    fn normalize_path_segment_is_idempotent() {
        assert_eq!(normalize_path_segment("sites/team/"), "/sites/team/");
        assert_eq!(normalize_path_segment("/sites/team/"), "/sites/team/");
    }
}
