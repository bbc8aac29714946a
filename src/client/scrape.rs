//! Browser-driven fallback accessor
//!
//! Used only for data the API does not expose: space-wide project enumeration
//! and shared-file directories the API cannot resolve. Every logical operation
//! is navigate, wait for the page to render, then extract from the DOM.
//!
//! The browser sits behind [`PageDriver`]; [`ChromiumSession`] drives a
//! headless Chromium through `chromiumoxide`, tests substitute a scripted
//! driver. DOM extraction is pure ([`extract_projects`], [`extract_file_tree`])
//! and uses `scraper`.

use async_trait::async_trait;
use bytes::Bytes;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::page::Page;
use futures_util::StreamExt;
use reqwest::header::COOKIE;
use reqwest::StatusCode;
use scraper::{ElementRef, Html, Selector};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OnceCell};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::backup::config::{PAGE_LOAD_TIMEOUT, REQUEST_TIMEOUT};
use crate::backup::rate_limit::RateLimiter;
use crate::client::api::{encode_path, encode_segment};
use crate::client::{FetcherError, FetcherResult, ScrapeSource};
use crate::metrics::record_navigation;
use crate::space::SpaceDomain;
use crate::Credentials;

const LOGIN_PATH: &str = "/login";
const LOGIN_USER_SELECTOR: &str = "#loginId";
const LOGIN_PASSWORD_SELECTOR: &str = "#password";
const LOGIN_SUBMIT_SELECTOR: &str = "input[type='submit']";
const PROJECT_LIST_SELECTOR: &str = ".project-list";
const PROJECT_ROW_SELECTOR: &str = "[data-project-key]";
const FILE_TREE_SELECTOR: &str = ".file-tree";
const FILE_ITEM_SELECTOR: &str = ".file-item";
const RENDER_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Minimal browser capability used by [`ScrapeClient`]
///
/// Calls are serialized by the client; implementations drive a single page.
#[async_trait]
pub trait PageDriver: Send + Sync {
    /// Load `url` and wait for the navigation to settle
    async fn goto(&self, url: &str) -> FetcherResult<()>;

    /// URL currently displayed, after redirects
    async fn current_url(&self) -> FetcherResult<String>;

    /// Serialized DOM of the current page
    async fn content(&self) -> FetcherResult<String>;

    /// Type `value` into the element matching `selector`
    async fn fill(&self, selector: &str, value: &str) -> FetcherResult<()>;

    /// Click the element matching `selector` and wait for any navigation
    async fn click(&self, selector: &str) -> FetcherResult<()>;

    /// Session cookies formatted as a `Cookie` header value
    async fn cookie_header(&self) -> FetcherResult<String>;
}

/// Find a Chromium binary: `BACKLOG_CHROMIUM_PATH`, then the system PATH.
pub fn find_chromium() -> Option<PathBuf> {
    if let Ok(p) = std::env::var("BACKLOG_CHROMIUM_PATH") {
        let path = PathBuf::from(&p);
        if path.exists() {
            return Some(path);
        }
    }

    ["google-chrome", "chromium", "chromium-browser"]
        .iter()
        .find_map(|name| which::which(name).ok())
}

struct ChromiumInner {
    // Keeps the browser process alive for as long as the page is used.
    _browser: Browser,
    page: Page,
    handler: JoinHandle<()>,
}

impl Drop for ChromiumInner {
    fn drop(&mut self) {
        self.handler.abort();
    }
}

/// Headless Chromium page, launched on first use
pub struct ChromiumSession {
    executable: Option<PathBuf>,
    inner: OnceCell<ChromiumInner>,
}

impl ChromiumSession {
    /// Session using `executable`, or [`find_chromium`] when `None`
    pub fn new(executable: Option<PathBuf>) -> Self {
        Self {
            executable,
            inner: OnceCell::new(),
        }
    }

    async fn page(&self) -> FetcherResult<&Page> {
        let inner = self
            .inner
            .get_or_try_init(|| async {
                let chrome_path = self
                    .executable
                    .clone()
                    .or_else(find_chromium)
                    .ok_or_else(|| {
                        FetcherError::Browser(
                            "Chromium not found; set BACKLOG_CHROMIUM_PATH".to_string(),
                        )
                    })?;

                info!(path = %chrome_path.display(), "Launching headless Chromium");
                let config = BrowserConfig::builder()
                    .chrome_executable(chrome_path)
                    .arg("--disable-gpu")
                    .arg("--no-sandbox")
                    .arg("--disable-dev-shm-usage")
                    .arg("--disable-extensions")
                    .build()
                    .map_err(|e| FetcherError::Browser(format!("invalid browser config: {e}")))?;

                let (browser, mut handler) = Browser::launch(config)
                    .await
                    .map_err(|e| FetcherError::Browser(format!("failed to launch Chromium: {e}")))?;

                let handler = tokio::spawn(async move {
                    while let Some(event) = handler.next().await {
                        let _ = event;
                    }
                });

                let page = browser
                    .new_page("about:blank")
                    .await
                    .map_err(|e| FetcherError::Browser(format!("failed to open page: {e}")))?;

                Ok::<_, FetcherError>(ChromiumInner {
                    _browser: browser,
                    page,
                    handler,
                })
            })
            .await?;
        Ok(&inner.page)
    }
}

#[async_trait]
impl PageDriver for ChromiumSession {
    async fn goto(&self, url: &str) -> FetcherResult<()> {
        let page = self.page().await?;
        match tokio::time::timeout(PAGE_LOAD_TIMEOUT, page.goto(url)).await {
            Ok(Ok(_)) => {
                let _ = page.wait_for_navigation().await;
                Ok(())
            }
            Ok(Err(e)) => Err(FetcherError::TransientNetwork(format!("navigation failed: {e}"))),
            Err(_) => Err(FetcherError::TransientNetwork(format!(
                "navigation timed out after {}s",
                PAGE_LOAD_TIMEOUT.as_secs()
            ))),
        }
    }

    async fn current_url(&self) -> FetcherResult<String> {
        let page = self.page().await?;
        page.url()
            .await
            .map(|url| url.unwrap_or_default())
            .map_err(|e| FetcherError::Browser(format!("failed to read URL: {e}")))
    }

    async fn content(&self) -> FetcherResult<String> {
        let page = self.page().await?;
        page.content()
            .await
            .map_err(|e| FetcherError::Browser(format!("failed to read DOM: {e}")))
    }

    async fn fill(&self, selector: &str, value: &str) -> FetcherResult<()> {
        let page = self.page().await?;
        let element = page
            .find_element(selector)
            .await
            .map_err(|e| FetcherError::ScrapeExtractionFailed(format!("{selector}: {e}")))?;
        element
            .click()
            .await
            .map_err(|e| FetcherError::Browser(format!("focus {selector}: {e}")))?
            .type_str(value)
            .await
            .map_err(|e| FetcherError::Browser(format!("type into {selector}: {e}")))?;
        Ok(())
    }

    async fn click(&self, selector: &str) -> FetcherResult<()> {
        let page = self.page().await?;
        page.find_element(selector)
            .await
            .map_err(|e| FetcherError::ScrapeExtractionFailed(format!("{selector}: {e}")))?
            .click()
            .await
            .map_err(|e| FetcherError::Browser(format!("click {selector}: {e}")))?;
        let _ = page.wait_for_navigation().await;
        Ok(())
    }

    async fn cookie_header(&self) -> FetcherResult<String> {
        let page = self.page().await?;
        let cookies = page
            .get_cookies()
            .await
            .map_err(|e| FetcherError::Browser(format!("failed to read cookies: {e}")))?;
        Ok(cookies
            .iter()
            .map(|c| format!("{}={}", c.name, c.value))
            .collect::<Vec<_>>()
            .join("; "))
    }
}

#[derive(Debug, Default)]
struct SessionState {
    logged_in: bool,
    /// Bumped on every successful login
    generation: u64,
}

/// Browser-backed [`ScrapeSource`]
///
/// Shares the run's [`RateLimiter`] with the API client: every page transition
/// (navigation or form submit) and every session download takes a slot.
pub struct ScrapeClient {
    base_url: String,
    credentials: Credentials,
    driver: Box<dyn PageDriver>,
    rate_limiter: Arc<RateLimiter>,
    http: reqwest::Client,
    session: Mutex<SessionState>,
    render_timeout: Duration,
}

impl ScrapeClient {
    /// Client logging in to `domain` as `credentials` through `driver`
    ///
    /// # Errors
    /// Returns an error if the download client cannot be built.
    pub fn new(
        domain: &SpaceDomain,
        credentials: Credentials,
        driver: Box<dyn PageDriver>,
        rate_limiter: Arc<RateLimiter>,
    ) -> FetcherResult<Self> {
        let http = download_client(REQUEST_TIMEOUT)?;
        Ok(Self {
            base_url: domain.web_base_url().to_string(),
            credentials,
            driver,
            rate_limiter,
            http,
            session: Mutex::new(SessionState::default()),
            render_timeout: PAGE_LOAD_TIMEOUT,
        })
    }

    /// Override the timeout of session downloads
    pub fn with_download_timeout(mut self, timeout: Duration) -> FetcherResult<Self> {
        self.http = download_client(timeout)?;
        Ok(self)
    }

    /// Override how long to wait for a page to render its content
    pub fn with_render_timeout(mut self, timeout: Duration) -> Self {
        self.render_timeout = timeout;
        self
    }

    async fn navigate(&self, url: &str) -> FetcherResult<()> {
        self.rate_limiter.acquire().await;
        record_navigation();
        debug!(url, "Navigating");
        self.driver.goto(url).await
    }

    async fn on_login_page(&self) -> FetcherResult<bool> {
        let current = self.driver.current_url().await?;
        Ok(url_path(&current).starts_with(LOGIN_PATH))
    }

    /// Poll the DOM until `selector` matches or the render timeout passes
    async fn wait_for_render(&self, selector: &str) -> FetcherResult<String> {
        let deadline = Instant::now() + self.render_timeout;
        loop {
            let html = self.driver.content().await?;
            if contains_selector(&html, selector)? {
                return Ok(html);
            }
            if Instant::now() >= deadline {
                return Err(FetcherError::ScrapeExtractionFailed(format!(
                    "'{selector}' did not render within {}s",
                    self.render_timeout.as_secs()
                )));
            }
            tokio::time::sleep(RENDER_POLL_INTERVAL).await;
        }
    }

    async fn login(&self) -> FetcherResult<()> {
        info!(user = %self.credentials.username, "Logging in to web session");
        self.navigate(&format!("{}{}", self.base_url, LOGIN_PATH))
            .await?;
        self.wait_for_render(LOGIN_USER_SELECTOR).await?;
        self.driver
            .fill(LOGIN_USER_SELECTOR, &self.credentials.username)
            .await?;
        self.driver
            .fill(LOGIN_PASSWORD_SELECTOR, &self.credentials.password)
            .await?;

        // Submitting the form is a page transition.
        self.rate_limiter.acquire().await;
        record_navigation();
        self.driver.click(LOGIN_SUBMIT_SELECTOR).await?;

        if self.on_login_page().await? {
            return Err(FetcherError::LoginRejected(format!(
                "user '{}' was not signed in",
                self.credentials.username
            )));
        }
        Ok(())
    }

    async fn ensure_logged_in(&self, session: &mut SessionState) -> FetcherResult<()> {
        if !session.logged_in {
            self.login().await?;
            session.logged_in = true;
            session.generation += 1;
        }
        Ok(())
    }

    /// Cookie header of the current session, logging in first if needed
    async fn session_cookies(&self) -> FetcherResult<(String, u64)> {
        let mut session = self.session.lock().await;
        self.ensure_logged_in(&mut session).await?;
        Ok((self.driver.cookie_header().await?, session.generation))
    }

    /// Log in again unless another task already did since `seen_generation`
    async fn relogin_after_refusal(&self, seen_generation: u64) -> FetcherResult<(String, u64)> {
        let mut session = self.session.lock().await;
        if session.generation == seen_generation {
            session.logged_in = false;
            self.login()
                .await
                .map_err(|e| FetcherError::SessionExpired(e.to_string()))?;
            session.logged_in = true;
            session.generation += 1;
        }
        Ok((self.driver.cookie_header().await?, session.generation))
    }

    /// One cookie-authenticated GET; `None` when the server refuses the session
    async fn download_with_cookies(&self, url: &str, cookies: String) -> FetcherResult<Option<Bytes>> {
        self.rate_limiter.acquire().await;
        let response = self
            .http
            .get(url)
            .header(COOKIE, cookies)
            .send()
            .await
            .map_err(|e| FetcherError::TransientNetwork(e.to_string()))?;

        match response.status() {
            status if status.is_success() => response
                .bytes()
                .await
                .map(Some)
                .map_err(|e| FetcherError::TransientNetwork(e.to_string())),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Ok(None),
            StatusCode::NOT_FOUND => Err(FetcherError::NotFound(url.to_string())),
            status => Err(FetcherError::Http {
                status: status.as_u16(),
                message: url.to_string(),
            }),
        }
    }

    /// Navigate to `url` inside the web session and return its rendered DOM
    ///
    /// A redirect to the login page triggers one re-login; a second redirect
    /// fails with [`FetcherError::SessionExpired`].
    async fn open_page(&self, url: &str, ready_selector: &str) -> FetcherResult<String> {
        let mut session = self.session.lock().await;
        self.ensure_logged_in(&mut session).await?;

        self.navigate(url).await?;
        if self.on_login_page().await? {
            warn!(url, "Web session expired, re-authenticating once");
            session.logged_in = false;
            self.login()
                .await
                .map_err(|e| FetcherError::SessionExpired(e.to_string()))?;
            session.logged_in = true;
            session.generation += 1;

            self.navigate(url).await?;
            if self.on_login_page().await? {
                session.logged_in = false;
                return Err(FetcherError::SessionExpired(format!(
                    "redirected to login again for {url}"
                )));
            }
        }

        self.wait_for_render(ready_selector).await
    }
}

#[async_trait]
impl ScrapeSource for ScrapeClient {
    async fn list_space_projects(&self) -> FetcherResult<Vec<Value>> {
        let url = format!("{}/projects", self.base_url);
        let html = self.open_page(&url, PROJECT_LIST_SELECTOR).await?;
        let projects = extract_projects(&html)?;
        info!(count = projects.len(), "Scraped space project list");
        Ok(projects)
    }

    async fn list_file_tree(&self, project_key: &str, path: &str) -> FetcherResult<Vec<Value>> {
        let url = format!(
            "{}/projects/{}/files/tree?path=/{}",
            self.base_url,
            encode_segment(project_key),
            encode_path(path)
        );
        let html = self.open_page(&url, FILE_TREE_SELECTOR).await?;
        extract_file_tree(&html, path)
    }

    /// Download through the web session
    ///
    /// A refused download triggers one re-login; a second refusal fails with
    /// [`FetcherError::SessionExpired`].
    async fn download_file(&self, project_key: &str, path: &str) -> FetcherResult<Bytes> {
        let url = format!(
            "{}/downloadFile/{}/{}",
            self.base_url,
            encode_segment(project_key),
            encode_path(path)
        );

        let (cookies, generation) = self.session_cookies().await?;
        if let Some(bytes) = self.download_with_cookies(&url, cookies).await? {
            return Ok(bytes);
        }

        warn!(path, "Download refused, re-authenticating once");
        let (cookies, _) = self.relogin_after_refusal(generation).await?;
        match self.download_with_cookies(&url, cookies).await? {
            Some(bytes) => Ok(bytes),
            None => {
                self.session.lock().await.logged_in = false;
                Err(FetcherError::SessionExpired(format!(
                    "download of {path} was refused after re-login"
                )))
            }
        }
    }
}

fn download_client(timeout: Duration) -> FetcherResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| FetcherError::TransientNetwork(format!("failed to build HTTP client: {e}")))
}

fn parse_selector(selector: &str) -> FetcherResult<Selector> {
    Selector::parse(selector)
        .map_err(|e| FetcherError::ScrapeExtractionFailed(format!("invalid selector {selector}: {e}")))
}

fn contains_selector(html: &str, selector: &str) -> FetcherResult<bool> {
    let selector = parse_selector(selector)?;
    let document = Html::parse_document(html);
    let found = document.select(&selector).next().is_some();
    Ok(found)
}

fn url_path(url: &str) -> String {
    url::Url::parse(url)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| url.to_string())
}

fn attr(element: &ElementRef<'_>, name: &str) -> Option<String> {
    element
        .value()
        .attr(name)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Extract project rows from the space project list
///
/// Rows carry `data-project-key`, `data-project-id`, optional
/// `data-project-name` (falls back to the row text) and `data-archived`.
pub fn extract_projects(html: &str) -> FetcherResult<Vec<Value>> {
    let document = Html::parse_document(html);
    let list = parse_selector(PROJECT_LIST_SELECTOR)?;
    let row = parse_selector(PROJECT_ROW_SELECTOR)?;

    let container = document.select(&list).next().ok_or_else(|| {
        FetcherError::ScrapeExtractionFailed(format!("'{PROJECT_LIST_SELECTOR}' not found"))
    })?;

    container
        .select(&row)
        .map(|element| {
            let key = attr(&element, "data-project-key").ok_or_else(|| {
                FetcherError::ScrapeExtractionFailed("project row without key".to_string())
            })?;
            let id = attr(&element, "data-project-id").ok_or_else(|| {
                FetcherError::ScrapeExtractionFailed(format!("project {key} without id"))
            })?;
            let name = attr(&element, "data-project-name").unwrap_or_else(|| {
                element.text().collect::<String>().trim().to_string()
            });
            let archived = attr(&element, "data-archived")
                .map(|v| v.eq_ignore_ascii_case("true"))
                .unwrap_or(false);
            Ok(json!({
                "id": id,
                "projectKey": key,
                "name": name,
                "archived": archived,
            }))
        })
        .collect()
}

/// Extract file-tree entries rendered for directory `dir`
///
/// Items carry `data-name`, `data-type` (`directory`/`folder`/`file`) and
/// optionally `data-path` and `data-id`. A missing path is derived from `dir`.
pub fn extract_file_tree(html: &str, dir: &str) -> FetcherResult<Vec<Value>> {
    let document = Html::parse_document(html);
    let tree = parse_selector(FILE_TREE_SELECTOR)?;
    let item = parse_selector(FILE_ITEM_SELECTOR)?;

    let container = document.select(&tree).next().ok_or_else(|| {
        FetcherError::ScrapeExtractionFailed(format!("'{FILE_TREE_SELECTOR}' not found"))
    })?;

    let dir = dir.trim_matches('/');
    container
        .select(&item)
        .map(|element| {
            let name = attr(&element, "data-name").ok_or_else(|| {
                FetcherError::ScrapeExtractionFailed("file item without data-name".to_string())
            })?;
            let kind = match attr(&element, "data-type").as_deref() {
                Some("directory") | Some("folder") | Some("dir") => "directory",
                Some("file") | None => "file",
                Some(other) => {
                    return Err(FetcherError::ScrapeExtractionFailed(format!(
                        "unknown file item type '{other}'"
                    )))
                }
            };
            let path = attr(&element, "data-path").unwrap_or_else(|| {
                if dir.is_empty() {
                    name.clone()
                } else {
                    format!("{dir}/{name}")
                }
            });
            let mut record = json!({ "name": name, "path": path, "type": kind });
            if let Some(id) = attr(&element, "data-id") {
                record["id"] = Value::String(id);
            }
            Ok(record)
        })
        .collect()
}
