// The seam between the crawl controller and the page rendering engine.
//
// The engine loads pages into windows, runs scripts and reports every window
// content change. The controller only sees the types below.

use crate::error::FetchError;
use crate::proxy::ProxyConfig;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

pub const ABOUT_BLANK: &str = "about:blank";
pub const HOME_PAGE: &str = "http://unknown.unknown/";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WindowId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    Html,
    Text,
    Other,
}

impl PageKind {
    pub fn from_content_type(content_type: &str) -> Self {
        let mime = content_type
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_lowercase();
        if mime == "text/html" || mime == "application/xhtml+xml" {
            PageKind::Html
        } else if mime.starts_with("text/") {
            PageKind::Text
        } else {
            PageKind::Other
        }
    }
}

/// 300-307 except 304 Not Modified.
pub fn is_server_redirect_status(status: u16) -> bool {
    (300..=307).contains(&status) && status != 304
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WebResponse {
    pub status: u16,
    pub status_message: String,
    pub content_type: String,
    pub request_url: String,
    pub request_headers: Vec<(String, String)>,
    pub response_headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl WebResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.response_headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn request_headers_text(&self) -> String {
        headers_text(&self.request_headers)
    }

    pub fn response_headers_text(&self) -> String {
        headers_text(&self.response_headers)
    }
}

fn headers_text(headers: &[(String, String)]) -> String {
    headers
        .iter()
        .map(|(key, value)| format!("{}: {}\n", key, value))
        .collect()
}

/// A page loaded into a window.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub id: PageId,
    pub url: String,
    pub window: WindowId,
    pub in_frame: bool,
    pub kind: PageKind,
    pub response: Arc<WebResponse>,
}

impl Page {
    pub fn is_about_blank(&self) -> bool {
        self.url == ABOUT_BLANK
    }

    pub fn is_server_redirect(&self) -> bool {
        is_server_redirect_status(self.response.status)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomElement {
    pub tag: String,
    pub attributes: Vec<(String, String)>,
    pub inside_head: bool,
    pub enclosed_page: Option<PageId>,
}

impl DomElement {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_lowercase(),
            attributes: Vec::new(),
            inside_head: false,
            enclosed_page: None,
        }
    }

    pub fn with_attr(mut self, name: &str, value: &str) -> Self {
        self.attributes.push((name.to_lowercase(), value.to_string()));
        self
    }

    pub fn in_head(mut self) -> Self {
        self.inside_head = true;
        self
    }

    pub fn with_enclosed_page(mut self, page: PageId) -> Self {
        self.enclosed_page = Some(page);
        self
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub window: Option<WindowId>,
}

impl PageRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: vec![
                ("Accept-Encoding".to_string(), String::new()),
                (
                    "Accept".to_string(),
                    "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8".to_string(),
                ),
            ],
            window: None,
        }
    }

    pub fn in_window(mut self, window: WindowId) -> Self {
        self.window = Some(window);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOptions {
    pub javascript_enabled: bool,
    pub page_timeout: Option<Duration>,
    pub script_timeout: Option<Duration>,
    pub profile: String,
    pub proxy: Option<ProxyConfig>,
    pub insecure_ssl: bool,
    pub follow_redirects: bool,
    pub home_page: String,
    pub meta_refresh_limit: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            javascript_enabled: true,
            page_timeout: None,
            script_timeout: None,
            profile: String::new(),
            proxy: None,
            insecure_ssl: true,
            follow_redirects: false,
            home_page: HOME_PAGE.to_string(),
            meta_refresh_limit: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    pub secure: bool,
}

#[derive(Debug, Clone)]
pub struct WindowEvent {
    pub window: WindowId,
    pub is_frame: bool,
    pub old_page: Option<Page>,
    pub new_page: Option<Page>,
}

pub trait WindowListener: Send + Sync {
    fn window_opened(&self, _event: &WindowEvent) {}
    fn content_changed(&self, event: &WindowEvent);
    fn window_closed(&self, event: &WindowEvent);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptCompilation {
    pub origin: String,
    pub name: String,
    pub source: String,
    pub generated: bool,
    pub stack_depth: usize,
    pub parent_depth: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptVerdict {
    Proceed,
    Abort(String),
}

pub trait ScriptListener: Send + Sync {
    fn script_compiled(&self, script: &ScriptCompilation) -> ScriptVerdict;
}

/// A page rendering engine. Implementations use interior mutability: the
/// worker fetches on pool threads while the follower may close windows.
pub trait Engine: Send + Sync {
    fn configure(
        &self,
        options: EngineOptions,
        windows: Arc<dyn WindowListener>,
        scripts: Arc<dyn ScriptListener>,
    );

    /// Loads a page and returns what the target window holds afterwards.
    fn get_page(&self, request: &PageRequest) -> Result<Page, FetchError>;

    /// Downloads a resource without showing it in any window.
    fn download(&self, request: &PageRequest) -> Result<Arc<WebResponse>, FetchError>;

    /// DOM elements of a loaded page in document order.
    fn elements(&self, page: PageId) -> Vec<DomElement>;

    /// Returns how many background scripts are still running.
    fn wait_for_background_scripts(&self, timeout: Duration) -> usize;

    fn set_javascript_enabled(&self, enabled: bool);

    fn stop_javascript(&self);

    fn close_all_windows(&self);

    fn cookies(&self) -> Vec<Cookie>;

    fn add_cookie(&self, cookie: Cookie);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_kind_from_content_type() {
        assert_eq!(PageKind::from_content_type("text/html; charset=utf-8"), PageKind::Html);
        assert_eq!(PageKind::from_content_type("application/xhtml+xml"), PageKind::Html);
        assert_eq!(PageKind::from_content_type("text/plain"), PageKind::Text);
        assert_eq!(PageKind::from_content_type("application/pdf"), PageKind::Other);
        assert_eq!(PageKind::from_content_type(""), PageKind::Other);
    }

    #[test]
    fn test_server_redirect_status() {
        assert!(is_server_redirect_status(301));
        assert!(is_server_redirect_status(302));
        assert!(is_server_redirect_status(307));
        assert!(!is_server_redirect_status(304));
        assert!(!is_server_redirect_status(308));
        assert!(!is_server_redirect_status(200));
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let response = WebResponse {
            response_headers: vec![("Location".into(), "/next".into())],
            ..Default::default()
        };
        assert_eq!(response.header("location"), Some("/next"));
        assert_eq!(response.response_headers_text(), "Location: /next\n");
    }

    #[test]
    fn test_dom_element_attr() {
        let element = DomElement::new("IMG").with_attr("SRC", "a.png");
        assert_eq!(element.tag, "img");
        assert_eq!(element.attr("src"), Some("a.png"));
        assert_eq!(element.attr("alt"), None);
    }
}
