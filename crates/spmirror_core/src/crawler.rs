use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::config::MirrorConfig;
use crate::fetch::AssetFetcher;
use crate::log::NavigationLog;
use crate::manifest::write_manifest;
use crate::page::{PageLink, parse_page, persist_page, sanitize_title};
use crate::session::{BrowserSession, settle, wait_for_content};

/// How many history steps the engine will take to escape a
/// not-found/error landing before giving up on the crawl.
const MAX_NOT_FOUND_BACKSTEPS: usize = 8;

/// One successfully crawled page. Appended in crawl order and never
/// mutated; the order carries first-wins duplicate precedence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisitedPage {
    pub page_name: String,
    pub local_path: PathBuf,
    pub source_url: String,
}

#[derive(Debug, Default, Clone)]
pub struct CrawlReport {
    pub pages_visited: usize,
    pub duplicate_stubs: usize,
    pub skipped_links: usize,
    pub not_found_recoveries: usize,
}

/// All mutable crawl state, owned exclusively by the traversal engine
/// and threaded through the recursion instead of living in globals.
pub struct CrawlContext {
    visited: Vec<VisitedPage>,
    url_stack: Vec<String>,
    used_slugs: HashSet<String>,
    log: NavigationLog,
    report: CrawlReport,
}

impl CrawlContext {
    pub fn new(log: NavigationLog) -> Self {
        Self {
            visited: Vec::new(),
            url_stack: Vec::new(),
            used_slugs: HashSet::new(),
            log,
            report: CrawlReport::default(),
        }
    }

    pub fn visited(&self) -> &[VisitedPage] {
        &self.visited
    }

    pub fn report(&self) -> &CrawlReport {
        &self.report
    }

    fn find_visited(&self, source_url: &str) -> Option<&VisitedPage> {
        self.visited
            .iter()
            .find(|page| page.source_url == source_url)
    }

    /// Directory slug for a page title, disambiguated site-wide with a
    /// numeric suffix when two distinct pages share a title.
    fn unique_slug(&mut self, title: &str) -> String {
        let mut base = sanitize_title(title);
        if base.is_empty() {
            base = "untitled".to_string();
        }
        if self.used_slugs.insert(base.clone()) {
            return base;
        }
        let mut suffix = 2usize;
        loop {
            let candidate = format!("{base}-{suffix}");
            if self.used_slugs.insert(candidate.clone()) {
                return candidate;
            }
            suffix += 1;
        }
    }
}

/// Why a link produced no traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    MissingHref,
    Excluded,
    SelfLink,
    BrokenMarker,
}

/// Outcome of classifying one outbound link. Evaluation order is part
/// of the contract: the first matching rule wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkAction {
    Skip(SkipReason),
    /// Resolved URL already has a VisitedPage; hand to the duplicate
    /// handler instead of recursing.
    Duplicate(String),
    /// A wiki page under the live base; recurse after navigating.
    FollowWikiPage(String),
    /// A legacy-prefixed alias, already rewritten to the live base;
    /// navigation errors here are logged and skipped, not fatal.
    FollowRedirect(String),
    /// External or asset link; persistence handled it, traversal
    /// ignores it.
    Ignore,
}

pub fn classify_link(
    link: &PageLink,
    current_url: &str,
    visited: &[VisitedPage],
    config: &MirrorConfig,
) -> Result<LinkAction> {
    let href = match link.href.as_deref() {
        Some(href) if !href.trim().is_empty() => href.trim(),
        _ => return Ok(LinkAction::Skip(SkipReason::MissingHref)),
    };

    if config.is_excluded(href) {
        return Ok(LinkAction::Skip(SkipReason::Excluded));
    }

    let current_segment = final_path_segment(current_url);
    if href.starts_with('#') || (!current_segment.is_empty() && href.contains(&current_segment)) {
        return Ok(LinkAction::Skip(SkipReason::SelfLink));
    }

    let marker = config.broken_link_class();
    if link.classes.iter().any(|class| class == marker) {
        return Ok(LinkAction::Skip(SkipReason::BrokenMarker));
    }

    // Legacy aliases point at the live site once rewritten; the
    // rewritten URL is what the visited set and the browser see, so
    // the duplicate check must run on that form.
    let mut legacy_target = None;
    if let Some(prefix) = config.legacy_url_prefix() {
        if let Some(rest) = href.strip_prefix(&prefix) {
            legacy_target = Some(format!("{}{}", config.site_url()?, rest));
        }
    }

    let resolved = config.resolve_url(href)?;
    let effective = legacy_target.as_deref().unwrap_or(&resolved);
    if visited.iter().any(|page| page.source_url == effective) {
        return Ok(LinkAction::Duplicate(effective.to_string()));
    }

    let wiki_path = config.wiki_base_path().unwrap_or_default();
    let wiki_base = config.wiki_page_base().unwrap_or_default();
    let is_page = href.to_ascii_lowercase().ends_with(
        &config.page_extension().to_ascii_lowercase(),
    );
    if is_page
        && ((!wiki_path.is_empty() && href.starts_with(&wiki_path))
            || (!wiki_base.is_empty() && href.starts_with(&wiki_base)))
    {
        return Ok(LinkAction::FollowWikiPage(resolved));
    }

    if let Some(target) = legacy_target {
        return Ok(LinkAction::FollowRedirect(target));
    }

    Ok(LinkAction::Ignore)
}

/// Crawl one page and, depth first, everything reachable from it.
/// One frame: enter, render, persist, dispatch links, exit via
/// back-navigation. The browser position and `parent_dir` correspond
/// 1:1 to the active frame for the whole call.
pub fn crawl_page(
    session: &mut dyn BrowserSession,
    fetcher: &mut dyn AssetFetcher,
    config: &MirrorConfig,
    ctx: &mut CrawlContext,
    parent_dir: &Path,
    url: &str,
    depth: usize,
) -> Result<()> {
    if depth > config.max_depth() {
        bail!(
            "crawl depth {depth} exceeds the configured limit of {} at {url}",
            config.max_depth()
        );
    }

    // Entering
    if session.current_url()? != url {
        session.navigate(url)?;
        settle(config);
    }
    wait_for_content(session, config)?;

    // Rendering
    let source = session.page_source()?;
    let parsed = parse_page(&source, config)?;

    // Persisting
    let slug = ctx.unique_slug(&parsed.title_text);
    let page_dir = parent_dir.join(&slug);
    fs::create_dir_all(&page_dir)
        .with_context(|| format!("failed to create {}", page_dir.display()))?;
    let file_name = format!("{slug}.html");
    let local_path = page_dir.join(&file_name);
    if !local_path.exists() {
        persist_page(&parsed, &page_dir, &file_name, fetcher, config)?;
    }
    ctx.visited.push(VisitedPage {
        page_name: slug,
        local_path,
        source_url: url.to_string(),
    });
    ctx.report.pages_visited += 1;
    ctx.url_stack.push(session.current_url()?);

    // EnumeratingLinks + PerLinkDispatch
    for link in &parsed.links {
        match classify_link(link, url, &ctx.visited, config)? {
            LinkAction::Skip(_) => ctx.report.skipped_links += 1,
            LinkAction::Ignore => {}
            LinkAction::Duplicate(resolved) => {
                if let Some(existing) = ctx.find_visited(&resolved).cloned() {
                    write_duplicate_stub(ctx, &page_dir, &existing)?;
                }
            }
            LinkAction::FollowWikiPage(target) => {
                follow_link(session, fetcher, config, ctx, &page_dir, &target, depth, false)?;
            }
            LinkAction::FollowRedirect(target) => {
                follow_link(session, fetcher, config, ctx, &page_dir, &target, depth, true)?;
            }
        }
    }

    // Exiting
    session.back()?;
    settle(config);
    ctx.url_stack.pop();
    Ok(())
}

enum NavOutcome {
    Landed,
    ErrorPage,
    Excluded,
}

/// Navigate to a link target and recurse, with the pre-recursion
/// checks of the dispatch rules: not-found back-retry, post-redirect
/// exclusion, and — for legacy-alias links — logged-and-skipped
/// navigation failures.
#[allow(clippy::too_many_arguments)]
fn follow_link(
    session: &mut dyn BrowserSession,
    fetcher: &mut dyn AssetFetcher,
    config: &MirrorConfig,
    ctx: &mut CrawlContext,
    page_dir: &Path,
    target: &str,
    depth: usize,
    lenient: bool,
) -> Result<()> {
    match navigate_checked(session, config, ctx, target) {
        Ok(NavOutcome::Landed) => {}
        Ok(NavOutcome::ErrorPage) | Ok(NavOutcome::Excluded) => return Ok(()),
        Err(error) if lenient => {
            ctx.report.skipped_links += 1;
            ctx.log
                .log(&format!("link exception at {target}: {error:#}"))?;
            let _ = session.back();
            settle(config);
            return Ok(());
        }
        Err(error) => return Err(error),
    }
    crawl_page(session, fetcher, config, ctx, page_dir, target, depth + 1)
}

fn navigate_checked(
    session: &mut dyn BrowserSession,
    config: &MirrorConfig,
    ctx: &mut CrawlContext,
    target: &str,
) -> Result<NavOutcome> {
    session.navigate(target)?;
    settle(config);

    if is_error_title(&session.current_title()?, config) {
        for _ in 0..MAX_NOT_FOUND_BACKSTEPS {
            session.back()?;
            settle(config);
            if !is_error_title(&session.current_title()?, config) {
                ctx.report.not_found_recoveries += 1;
                return Ok(NavOutcome::ErrorPage);
            }
        }
        bail!("could not back out of the error page reached via {target}");
    }

    let landed = session.current_url()?;
    if config.is_excluded(target) || config.is_excluded(&landed) {
        ctx.log
            .log(&format!("refusing excluded traversal target {target}"))?;
        session.back()?;
        settle(config);
        return Ok(NavOutcome::Excluded);
    }
    Ok(NavOutcome::Landed)
}

fn is_error_title(title: &str, config: &MirrorConfig) -> bool {
    let trimmed = title.trim();
    config
        .error_titles()
        .iter()
        .any(|error| trimmed.contains(error.as_str()))
}

/// Duplicate handler: a same-named stub directory whose single page
/// points the reader at the canonical copy and the legacy original.
/// Never recurses.
fn write_duplicate_stub(
    ctx: &mut CrawlContext,
    parent_dir: &Path,
    existing: &VisitedPage,
) -> Result<()> {
    let stub_dir = parent_dir.join(&existing.page_name);
    fs::create_dir_all(&stub_dir)
        .with_context(|| format!("failed to create {}", stub_dir.display()))?;
    let stub_path = stub_dir.join(format!("{}.html", existing.page_name));
    if !stub_path.exists() {
        let relative = relative_path(&stub_dir, &existing.local_path);
        let name = &existing.page_name;
        let url = &existing.source_url;
        let body = format!(
            "<div><p>This page was already exported elsewhere in this mirror.</p>\
             <p>Canonical copy: <a href=\"{relative}\">{name}</a></p>\
             <p>Legacy location: <a href=\"{url}\">{url}</a></p></div>"
        );
        fs::write(
            &stub_path,
            format!("<html><head><meta charset=\"utf-8\"></head><body>{body}</body></html>"),
        )
        .with_context(|| format!("failed to write {}", stub_path.display()))?;
        ctx.report.duplicate_stubs += 1;
    }
    ctx.log.log(&format!(
        "duplicate link target {} already mirrored at {}",
        existing.source_url,
        existing.local_path.display()
    ))?;
    Ok(())
}

/// Relative path from one mirror directory to another mirror file.
/// Both sit under the same root, so component-wise stripping suffices.
fn relative_path(from_dir: &Path, to: &Path) -> String {
    let from: Vec<_> = from_dir.components().collect();
    let to_parts: Vec<_> = to.components().collect();
    let mut common = 0usize;
    while common < from.len() && common < to_parts.len() && from[common] == to_parts[common] {
        common += 1;
    }
    let mut parts: Vec<String> = Vec::new();
    for _ in common..from.len() {
        parts.push("..".to_string());
    }
    for component in &to_parts[common..] {
        parts.push(component.as_os_str().to_string_lossy().to_string());
    }
    if parts.is_empty() {
        ".".to_string()
    } else {
        parts.join("/")
    }
}

/// Final path segment of a URL, query and fragment stripped.
fn final_path_segment(url: &str) -> String {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    without_query
        .rsplit('/')
        .next()
        .unwrap_or("")
        .to_string()
}

/// Run a whole mirror: create the root, crawl from the configured
/// entry page, write the manifest, report.
pub fn run_mirror(
    session: &mut dyn BrowserSession,
    fetcher: &mut dyn AssetFetcher,
    config: &MirrorConfig,
    mirror_root: &Path,
) -> Result<CrawlReport> {
    fs::create_dir_all(mirror_root)
        .with_context(|| format!("failed to create {}", mirror_root.display()))?;
    let mut ctx = CrawlContext::new(NavigationLog::at_root(mirror_root));
    let root_url = config.root_url()?;
    crawl_page(session, fetcher, config, &mut ctx, mirror_root, &root_url, 0)?;
    write_manifest(mirror_root, ctx.visited())?;
    Ok(ctx.report)
}
