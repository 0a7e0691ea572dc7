use std::thread::sleep;
use std::time::{Duration, Instant};

use anyhow::Result;

use crate::config::MirrorConfig;

/// One cookie from the authenticated browsing session, carried over to
/// the asset HTTP client so binary downloads skip a full render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
}

/// The authenticated browsing session the crawler drives. The crawler
/// never owns rendering; it only navigates, reads back the rendered
/// document, and walks history. Exactly one session exists per crawl.
pub trait BrowserSession {
    fn navigate(&mut self, url: &str) -> Result<()>;
    fn current_url(&mut self) -> Result<String>;
    fn current_title(&mut self) -> Result<String>;
    fn page_source(&mut self) -> Result<String>;
    fn back(&mut self) -> Result<()>;
    fn cookies(&mut self) -> Result<Vec<Cookie>>;
}

/// Poll the rendered source until the configured content container id
/// shows up, bounded by `ready_timeout_ms`. Returns `false` on timeout
/// so callers can treat the page as content-less instead of failing
/// the crawl on a slow or empty page.
pub fn wait_for_content(
    session: &mut dyn BrowserSession,
    config: &MirrorConfig,
) -> Result<bool> {
    let marker = format!("id=\"{}\"", config.content_element_id()?);
    let deadline = Instant::now() + Duration::from_millis(config.ready_timeout_ms());
    loop {
        let source = session.page_source()?;
        if source.contains(&marker) {
            return Ok(true);
        }
        if Instant::now() >= deadline {
            return Ok(false);
        }
        sleep(Duration::from_millis(config.poll_interval_ms().max(1)));
    }
}

/// Settle pause after a navigation or back step, tolerating render
/// latency the readiness poll cannot observe (history traversal does
/// not change the document id set).
pub fn settle(config: &MirrorConfig) {
    let delay = config.settle_delay_ms();
    if delay > 0 {
        sleep(Duration::from_millis(delay));
    }
}

#[cfg(feature = "browser")]
pub use chrome::ChromeSession;

#[cfg(feature = "browser")]
mod chrome {
    use std::sync::Arc;
    use std::thread::sleep;
    use std::time::Duration;

    use anyhow::{Context, Result, anyhow};
    use headless_chrome::{Browser, LaunchOptions, Tab};

    use super::{BrowserSession, Cookie};

    /// CDP-driven session. Launch headed for interactive logon, then a
    /// bounded wait gives the operator time to authenticate before the
    /// crawl starts.
    pub struct ChromeSession {
        _browser: Browser,
        tab: Arc<Tab>,
    }

    impl ChromeSession {
        pub fn launch(headless: bool) -> Result<Self> {
            let options = LaunchOptions::default_builder()
                .headless(headless)
                .build()
                .map_err(|error| anyhow!("failed to assemble browser launch options: {error}"))?;
            let browser = Browser::new(options).context("failed to launch browser")?;
            let tab = browser.new_tab().context("failed to open browser tab")?;
            Ok(Self {
                _browser: browser,
                tab,
            })
        }

        /// Navigate to the logon URL and block until the operator has
        /// had `wait_secs` to complete interactive authentication.
        pub fn interactive_logon(&mut self, url: &str, wait_secs: u64) -> Result<()> {
            self.navigate(url)?;
            sleep(Duration::from_secs(wait_secs));
            Ok(())
        }
    }

    impl BrowserSession for ChromeSession {
        fn navigate(&mut self, url: &str) -> Result<()> {
            self.tab
                .navigate_to(url)
                .with_context(|| format!("failed to navigate to {url}"))?;
            self.tab
                .wait_until_navigated()
                .with_context(|| format!("navigation to {url} did not complete"))?;
            Ok(())
        }

        fn current_url(&mut self) -> Result<String> {
            Ok(self.tab.get_url())
        }

        fn current_title(&mut self) -> Result<String> {
            self.tab.get_title().context("failed to read page title")
        }

        fn page_source(&mut self) -> Result<String> {
            self.tab
                .get_content()
                .context("failed to read rendered page source")
        }

        fn back(&mut self) -> Result<()> {
            self.tab
                .evaluate("history.back()", false)
                .context("failed to navigate back")?;
            Ok(())
        }

        fn cookies(&mut self) -> Result<Vec<Cookie>> {
            let cookies = self.tab.get_cookies().context("failed to read cookies")?;
            Ok(cookies
                .into_iter()
                .map(|cookie| Cookie {
                    name: cookie.name,
                    value: cookie.value,
                })
                .collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CrawlSection, MirrorConfig, SiteSection};

    struct StaticSession {
        source: String,
        reads: usize,
    }

    impl BrowserSession for StaticSession {
        fn navigate(&mut self, _url: &str) -> Result<()> {
            Ok(())
        }

        fn current_url(&mut self) -> Result<String> {
            Ok("about:blank".to_string())
        }

        fn current_title(&mut self) -> Result<String> {
            Ok(String::new())
        }

        fn page_source(&mut self) -> Result<String> {
            self.reads += 1;
            Ok(self.source.clone())
        }

        fn back(&mut self) -> Result<()> {
            Ok(())
        }

        fn cookies(&mut self) -> Result<Vec<Cookie>> {
            Ok(Vec::new())
        }
    }

    fn config() -> MirrorConfig {
        MirrorConfig {
            site: SiteSection {
                content_element_id: Some("contentBox".to_string()),
                ..SiteSection::default()
            },
            crawl: CrawlSection {
                ready_timeout_ms: Some(0),
                poll_interval_ms: Some(1),
                settle_delay_ms: Some(0),
                ..CrawlSection::default()
            },
        }
    }

    #[test]
    fn wait_for_content_finds_container_id() {
        let mut session = StaticSession {
            source: "<div id=\"contentBox\"></div>".to_string(),
            reads: 0,
        };
        let ready = wait_for_content(&mut session, &config()).expect("wait");
        assert!(ready);
        assert_eq!(session.reads, 1);
    }

    #[test]
    fn wait_for_content_times_out_on_missing_container() {
        let mut session = StaticSession {
            source: "<div id=\"other\"></div>".to_string(),
            reads: 0,
        };
        let ready = wait_for_content(&mut session, &config()).expect("wait");
        assert!(!ready);
    }
}
