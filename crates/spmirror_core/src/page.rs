use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use scraper::{Html, Selector};

use crate::config::MirrorConfig;
use crate::fetch::AssetFetcher;

/// One anchor found under the content container, in document order.
#[derive(Debug, Clone)]
pub struct PageLink {
    pub href: Option<String>,
    pub classes: Vec<String>,
}

/// A rendered wiki page reduced to what the crawl needs: the heading,
/// the heading's self-anchor, the content subtree, and its links.
#[derive(Debug, Clone)]
pub struct ParsedPage {
    pub title_text: String,
    pub title_href: Option<String>,
    /// Outer HTML of the content container; `None` for empty wiki
    /// pages whose container never rendered.
    pub content_html: Option<String>,
    pub links: Vec<PageLink>,
}

/// Parse a rendered document and locate the title element and content
/// container by their configured ids. A missing title is an error; a
/// missing content container is a legal empty page.
pub fn parse_page(html: &str, config: &MirrorConfig) -> Result<ParsedPage> {
    let document = Html::parse_document(html);
    let title_id = config.title_element_id()?;
    let title = document
        .select(&id_selector(title_id)?)
        .next()
        .ok_or_else(|| anyhow!("title element id=\"{title_id}\" not found in rendered page"))?;
    let title_text = title.text().collect::<String>().trim().to_string();
    if title_text.is_empty() {
        bail!("title element id=\"{title_id}\" has no text");
    }

    let anchors = tag_selector("a")?;
    let title_href = title
        .select(&anchors)
        .next()
        .and_then(|anchor| anchor.value().attr("href"))
        .map(str::to_string);

    let content = document
        .select(&id_selector(config.content_element_id()?)?)
        .next();
    let content_html = content.map(|element| element.html());
    let mut links = Vec::new();
    if let Some(element) = content {
        for anchor in element.select(&anchors) {
            links.push(PageLink {
                href: anchor.value().attr("href").map(str::to_string),
                classes: anchor
                    .value()
                    .classes()
                    .map(str::to_string)
                    .collect(),
            });
        }
    }

    Ok(ParsedPage {
        title_text,
        title_href,
        content_html,
        links,
    })
}

/// Persist one parsed page into `page_dir` as `file_name`.
///
/// Assets referenced from the content are downloaded next to the page
/// and their references rewritten to bare local names. Site-internal
/// asset failures abort the crawl; external image failures are best
/// effort. The banner + content concatenation is re-parsed into a
/// fresh document before writing so malformed fragments normalize,
/// and wiki-page links inside the content container are finalized to
/// `./<slug>/<slug>.html` sibling paths on that same in-memory
/// document, producing a single write.
pub fn persist_page(
    page: &ParsedPage,
    page_dir: &Path,
    file_name: &str,
    fetcher: &mut dyn AssetFetcher,
    config: &MirrorConfig,
) -> Result<PathBuf> {
    // A page without a content container still gets a file on disk:
    // the banner alone carries the title and the legacy link, and
    // duplicate stubs elsewhere in the tree may point here.
    let content = page.content_html.clone().unwrap_or_default();

    let content = rewrite_assets(&content, page_dir, fetcher, config)?;
    let banner = provenance_banner(page, config)?;
    let normalized = Html::parse_document(&format!("{banner}\n{content}"));
    let serialized = normalized.root_element().html();
    let finalized = finalize_wiki_links(&serialized, config)?;

    let path = page_dir.join(file_name);
    fs::write(&path, finalized.as_bytes())
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}

/// Export note + legacy link + heading, prepended to every saved page.
fn provenance_banner(page: &ParsedPage, config: &MirrorConfig) -> Result<String> {
    let title = &page.title_text;
    let legacy = match &page.title_href {
        Some(href) => config.resolve_url(href)?,
        None => config.root_url()?,
    };
    Ok(format!(
        "<div><p>This page has been automatically exported from the wiki.</p>\
         <p>If something doesn't look right you can go to the legacy link: \
         <a href=\"{legacy}\">{title}</a></p><h1>{title}</h1></div>"
    ))
}

/// Download referenced assets and rewrite their references to local
/// names. Images qualify when sourced under the asset base or from any
/// absolute URL; anchors qualify when they point at an asset-library
/// file rather than a wiki page.
fn rewrite_assets(
    content: &str,
    page_dir: &Path,
    fetcher: &mut dyn AssetFetcher,
    config: &MirrorConfig,
) -> Result<String> {
    let fragment = Html::parse_fragment(content);
    let asset_path = config.asset_base_path();
    let asset_base = config.asset_url_base()?;
    let mut rewrites: BTreeMap<String, String> = BTreeMap::new();

    for image in fragment.select(&tag_selector("img")?) {
        let src = match image.value().attr("src") {
            Some(src) => src,
            None => continue,
        };
        let internal = is_under(src, &asset_path) || is_under(src, &asset_base);
        let absolute = src.starts_with("http://") || src.starts_with("https://");
        if !internal && !absolute {
            continue;
        }
        let local = local_asset_name(src);
        if local.is_empty() {
            continue;
        }
        let url = config.resolve_url(src)?;
        let result = fetcher.fetch(&url, &page_dir.join(&local));
        if internal {
            result.with_context(|| format!("failed to mirror wiki asset {url}"))?;
        } else if result.is_err() {
            // External image availability is not guaranteed; keep the
            // remote reference and move on.
            continue;
        }
        rewrites.insert(src.to_string(), local);
    }

    for anchor in fragment.select(&tag_selector("a")?) {
        let href = match anchor.value().attr("href") {
            Some(href) => href,
            None => continue,
        };
        let internal = is_under(href, &asset_path) || is_under(href, &asset_base);
        if !internal || ends_with_ignore_case(href, config.page_extension()) {
            continue;
        }
        let local = local_asset_name(href);
        if local.is_empty() {
            continue;
        }
        let url = config.resolve_url(href)?;
        fetcher
            .fetch(&url, &page_dir.join(&local))
            .with_context(|| format!("failed to mirror wiki file {url}"))?;
        rewrites.insert(href.to_string(), local);
    }

    Ok(apply_rewrites(content, &rewrites))
}

/// Rewrite wiki-page anchors inside the content container to relative
/// sibling paths. The slug comes from the href's final segment so the
/// link resolves once the target page's own directory exists.
fn finalize_wiki_links(serialized: &str, config: &MirrorConfig) -> Result<String> {
    let document = Html::parse_document(serialized);
    let content = match document
        .select(&id_selector(config.content_element_id()?)?)
        .next()
    {
        Some(content) => content,
        None => return Ok(serialized.to_string()),
    };

    let wiki_path = config.wiki_base_path().unwrap_or_default();
    let wiki_base = config.wiki_page_base().unwrap_or_default();
    let extension = config.page_extension().to_string();
    let mut rewrites: BTreeMap<String, String> = BTreeMap::new();
    for anchor in content.select(&tag_selector("a")?) {
        let href = match anchor.value().attr("href") {
            Some(href) => href,
            None => continue,
        };
        let under_wiki = is_under(href, &wiki_path) || is_under(href, &wiki_base);
        if !under_wiki || !ends_with_ignore_case(href, &extension) {
            continue;
        }
        let slug = page_slug_from_href(href, &extension);
        if slug.is_empty() {
            continue;
        }
        rewrites.insert(href.to_string(), format!("./{slug}/{slug}.html"));
    }

    // Only the content subtree gets relative links; the provenance
    // banner keeps its absolute legacy reference. The banner precedes
    // the container in the document, so the rewrite starts there.
    let marker = format!("id=\"{}\"", config.content_element_id()?);
    if let Some(start) = serialized.find(&marker) {
        let (head, tail) = serialized.split_at(start);
        return Ok(format!("{head}{}", apply_rewrites(tail, &rewrites)));
    }
    Ok(apply_rewrites(serialized, &rewrites))
}

fn apply_rewrites(html: &str, rewrites: &BTreeMap<String, String>) -> String {
    let mut output = html.to_string();
    for (original, replacement) in rewrites {
        // The serializer escapes ampersands inside attribute values, so
        // the needle must match the escaped form. Anchoring on the
        // attribute name keeps an identical quoted string in visible
        // text untouched.
        let escaped = escape_attr_value(original);
        for attr in ["href", "src"] {
            output = output.replace(
                &format!("{attr}=\"{escaped}\""),
                &format!("{attr}=\"{replacement}\""),
            );
        }
    }
    output
}

fn escape_attr_value(value: &str) -> String {
    value.replace('&', "&amp;").replace('"', "&quot;")
}

/// Directory/file-safe name from a page title: reserved characters and
/// whitespace runs collapse to single dashes.
pub fn sanitize_title(value: &str) -> String {
    let mut output = String::new();
    let mut previous_dash = false;
    for ch in value.chars() {
        if ch.is_whitespace() || matches!(ch, '<' | '>' | ':' | '"' | '|' | '?' | '*' | '/' | '\\')
        {
            if !previous_dash && !output.is_empty() {
                output.push('-');
                previous_dash = true;
            }
            continue;
        }
        output.push(ch);
        previous_dash = false;
    }
    while output.ends_with('-') {
        output.pop();
    }
    output
}

/// Local file name for an asset URL: final path segment, query and
/// fragment stripped, space-encoding undone.
pub fn local_asset_name(url: &str) -> String {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    let segment = without_query
        .rsplit('/')
        .next()
        .unwrap_or(without_query);
    sanitize_title(&segment.replace("%20", " "))
}

/// Directory slug for a wiki-page href: final segment with the page
/// extension stripped, sanitized the same way titles are.
pub fn page_slug_from_href(href: &str, extension: &str) -> String {
    let without_query = href.split(['?', '#']).next().unwrap_or(href);
    let segment = without_query.rsplit('/').next().unwrap_or(without_query);
    let stem = if ends_with_ignore_case(segment, extension) {
        &segment[..segment.len() - extension.len()]
    } else {
        segment
    };
    sanitize_title(&stem.replace("%20", " "))
}

fn ends_with_ignore_case(value: &str, suffix: &str) -> bool {
    value.len() >= suffix.len()
        && value
            .get(value.len() - suffix.len()..)
            .is_some_and(|tail| tail.eq_ignore_ascii_case(suffix))
}

/// True when a raw href/src sits under a site path or absolute prefix.
fn is_under(reference: &str, prefix: &str) -> bool {
    !prefix.is_empty() && reference.starts_with(prefix)
}

fn id_selector(id: &str) -> Result<Selector> {
    Selector::parse(&format!("[id=\"{id}\"]"))
        .map_err(|error| anyhow!("invalid id selector for {id:?}: {error}"))
}

fn tag_selector(tag: &str) -> Result<Selector> {
    Selector::parse(tag).map_err(|error| anyhow!("invalid selector {tag:?}: {error}"))
}
