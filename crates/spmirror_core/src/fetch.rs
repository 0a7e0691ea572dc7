use std::fs;
use std::path::Path;
use std::thread::sleep;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use reqwest::blocking::Client;

use crate::config::MirrorConfig;
use crate::session::Cookie;

/// Downloads one page asset to a local file. A trait seam so the
/// persister can be exercised against a counting fake.
pub trait AssetFetcher {
    fn fetch(&mut self, url: &str, destination: &Path) -> Result<()>;
}

/// Asset downloads ride on the browsing session's cookies instead of a
/// full browser render: the cookie jar is flattened into one `Cookie`
/// header on a standalone blocking client.
pub struct HttpFetcher {
    client: Client,
    cookie_header: Option<String>,
    user_agent: String,
    retries: usize,
    retry_delay_ms: u64,
}

impl HttpFetcher {
    pub fn from_session_cookies(cookies: &[Cookie], config: &MirrorConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.http_timeout_ms()))
            .build()
            .context("failed to build asset HTTP client")?;
        Ok(Self {
            client,
            cookie_header: cookie_header(cookies),
            user_agent: config.user_agent(),
            retries: config.http_retries(),
            retry_delay_ms: config.retry_delay_ms(),
        })
    }
}

impl AssetFetcher for HttpFetcher {
    fn fetch(&mut self, url: &str, destination: &Path) -> Result<()> {
        let mut last_error = None::<String>;
        for attempt in 0..=self.retries {
            let mut request = self
                .client
                .get(url)
                .header("User-Agent", self.user_agent.clone());
            if let Some(header) = &self.cookie_header {
                request = request.header("Cookie", header.clone());
            }
            match request.send() {
                Ok(response) => {
                    let status = response.status();
                    if !status.is_success() {
                        last_error = Some(format!("HTTP {}", status.as_u16()));
                    } else {
                        let bytes = response
                            .bytes()
                            .with_context(|| format!("failed to read body of {url}"))?;
                        fs::write(destination, &bytes).with_context(|| {
                            format!("failed to write {}", destination.display())
                        })?;
                        return Ok(());
                    }
                }
                Err(error) => last_error = Some(error.to_string()),
            }
            if attempt < self.retries {
                sleep(Duration::from_millis(
                    self.retry_delay_ms.saturating_mul(attempt as u64 + 1),
                ));
            }
        }
        let message = last_error.unwrap_or_else(|| "asset request failed".to_string());
        bail!("failed to fetch {url}: {message}")
    }
}

/// Flatten session cookies into a single `Cookie` request header.
/// Returns `None` when the session carries no cookies.
pub fn cookie_header(cookies: &[Cookie]) -> Option<String> {
    if cookies.is_empty() {
        return None;
    }
    Some(
        cookies
            .iter()
            .map(|cookie| format!("{}={}", cookie.name, cookie.value))
            .collect::<Vec<_>>()
            .join("; "),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookie_header_joins_pairs_in_order() {
        let cookies = vec![
            Cookie {
                name: "FedAuth".to_string(),
                value: "abc".to_string(),
            },
            Cookie {
                name: "rtFa".to_string(),
                value: "def".to_string(),
            },
        ];
        assert_eq!(
            cookie_header(&cookies).expect("header"),
            "FedAuth=abc; rtFa=def"
        );
    }

    #[test]
    fn cookie_header_is_absent_without_cookies() {
        assert!(cookie_header(&[]).is_none());
    }
}
