// Static HTTP engine built on reqwest and scraper
//
// Downloads pages without executing scripts. Inline scripts are still reported
// to the script listener so they end up in the crawl tree, meta refreshes are
// followed like client redirects and frames are loaded into frame windows.

use crate::engine::{
    Cookie, DomElement, Engine, EngineOptions, Page, PageId, PageKind, PageRequest, ScriptCompilation, ScriptListener,
    ScriptVerdict, WebResponse, WindowId, WindowListener,
};
use crate::error::FetchError;
use crate::links::resolve;
use crate::windows::{TOP_WINDOW, WindowRegistry};
use reqwest::Client;
use reqwest::redirect::Policy;
use reqwest_cookie_store::{CookieStore, CookieStoreMutex};
use scraper::{ElementRef, Html};
use std::collections::HashMap;
use std::error::Error as _;
use std::net::IpAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tracing::{debug, warn};
use url::Url;

const USER_AGENT: &str = "Mozilla/5.0 (compatible; Honeywalk/0.1; +https://github.com/trapdoorsec/honeywalk)";

/// Frames inside frames are loaded this deep.
const FRAME_DEPTH_LIMIT: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Refresh {
    delay: Duration,
    target: String,
}

#[derive(Debug, Default)]
struct ParsedDocument {
    elements: Vec<DomElement>,
    refresh: Option<Refresh>,
    inline_scripts: Vec<String>,
}

struct HttpState {
    client: Option<Client>,
    options: EngineOptions,
    elements: HashMap<PageId, Vec<DomElement>>,
    refresh: HashMap<PageId, String>,
    /// Cookies without a domain, bound to the host of the next request.
    unbound_cookies: Vec<Cookie>,
    javascript_enabled: bool,
}

pub struct HttpEngine {
    runtime: Handle,
    state: Mutex<HttpState>,
    cookies: Arc<CookieStoreMutex>,
    windows: WindowRegistry,
    scripts: Mutex<Option<Arc<dyn ScriptListener>>>,
}

impl HttpEngine {
    /// `runtime` drives the downloads; `get_page` must not be called from
    /// inside one of its async tasks.
    pub fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            state: Mutex::new(HttpState {
                client: None,
                options: EngineOptions::default(),
                elements: HashMap::new(),
                refresh: HashMap::new(),
                unbound_cookies: Vec::new(),
                javascript_enabled: true,
            }),
            cookies: Arc::new(CookieStoreMutex::new(CookieStore::default())),
            windows: WindowRegistry::new(),
            scripts: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HttpState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn client(&self) -> Result<Client, FetchError> {
        let mut state = self.lock();
        if let Some(client) = &state.client {
            return Ok(client.clone());
        }
        let client =
            build_client(&state.options, Arc::clone(&self.cookies)).map_err(|e| FetchError::Engine(e.to_string()))?;
        state.client = Some(client.clone());
        Ok(client)
    }

    fn request(&self, url: &str, headers: &[(String, String)]) -> Result<WebResponse, FetchError> {
        let parsed = Url::parse(url).map_err(|_| FetchError::UnsupportedProtocol(url.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(FetchError::UnsupportedProtocol(url.to_string()));
        }
        let host = parsed.host_str().unwrap_or_default().to_string();
        let client = self.client()?;

        let mut request_headers: Vec<(String, String)> = vec![
            ("Host".to_string(), host.clone()),
            ("User-Agent".to_string(), USER_AGENT.to_string()),
        ];
        request_headers.extend(headers.iter().filter(|(_, value)| !value.is_empty()).cloned());
        self.bind_cookies(&parsed);

        let mut builder = client.get(parsed.clone());
        for (name, value) in request_headers.iter().filter(|(name, _)| name != "Host") {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let (status, response_headers, body) = self
            .runtime
            .block_on(async move {
                let response = builder.send().await?;
                let status = response.status();
                let headers: Vec<(String, String)> = response
                    .headers()
                    .iter()
                    .filter_map(|(name, value)| {
                        value
                            .to_str()
                            .ok()
                            .map(|value| (name.as_str().to_string(), value.to_string()))
                    })
                    .collect();
                let body = response.bytes().await?;
                Ok::<_, reqwest::Error>((status, headers, body.to_vec()))
            })
            .map_err(|e| fetch_error(url, &host, &e))?;

        let content_type = response_headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("content-type"))
            .map(|(_, value)| value.clone())
            .unwrap_or_default();

        Ok(WebResponse {
            status: status.as_u16(),
            status_message: status.canonical_reason().unwrap_or_default().to_string(),
            content_type,
            request_url: url.to_string(),
            request_headers,
            response_headers,
            body,
        })
    }

    fn cookie_store(&self) -> MutexGuard<'_, CookieStore> {
        self.cookies.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Hands cookies that were added without a domain to the host of `url`.
    fn bind_cookies(&self, url: &Url) {
        let unbound = std::mem::take(&mut self.lock().unbound_cookies);
        for cookie in unbound {
            self.insert_cookie(&cookie, url, false);
        }
    }

    fn insert_cookie(&self, cookie: &Cookie, url: &Url, with_domain: bool) {
        let mut header = format!("{}={}", cookie.name, cookie.value);
        if with_domain {
            header.push_str("; Domain=");
            header.push_str(cookie.domain.trim_start_matches('.'));
        }
        if !cookie.path.is_empty() {
            header.push_str("; Path=");
            header.push_str(&cookie.path);
        }
        if cookie.secure {
            header.push_str("; Secure");
        }
        if let Err(e) = self.cookie_store().parse(&header, url) {
            debug!("Cookie {} rejected for {}: {}", cookie.name, url, e);
        }
    }

    fn load(
        &self,
        window: WindowId,
        url: &str,
        headers: &[(String, String)],
        frame_depth: usize,
    ) -> Result<Page, FetchError> {
        let response = self.request(url, headers)?;
        let kind = PageKind::from_content_type(&response.content_type);
        let document = match kind {
            PageKind::Html => parse_document(&String::from_utf8_lossy(&response.body)),
            _ => ParsedDocument::default(),
        };

        let page = self.windows.show(window, url, kind, Arc::new(response));
        self.report_inline_scripts(&page, &document.inline_scripts);

        let elements = document
            .elements
            .into_iter()
            .map(|element| self.load_frame(&page, element, headers, frame_depth))
            .collect();

        let mut state = self.lock();
        state.elements.insert(page.id, elements);
        let page_timeout = state.options.page_timeout;
        if let Some(refresh) = document.refresh
            && page_timeout.is_none_or(|timeout| refresh.delay < timeout)
            && let Some(target) = resolve(url, &refresh.target)
        {
            state.refresh.insert(page.id, target);
        }
        Ok(page)
    }

    fn load_frame(
        &self,
        page: &Page,
        mut element: DomElement,
        headers: &[(String, String)],
        frame_depth: usize,
    ) -> DomElement {
        if (element.tag != "frame" && element.tag != "iframe") || frame_depth >= FRAME_DEPTH_LIMIT {
            return element;
        }
        let Some(src) = element.attr("src").and_then(|src| resolve(&page.url, src)) else {
            return element;
        };
        if !(src.starts_with("http://") || src.starts_with("https://")) {
            return element;
        }

        let frame = self.windows.open_frame();
        match self.load(frame, &src, headers, frame_depth + 1) {
            Ok(loaded) => element.enclosed_page = Some(loaded.id),
            Err(e) => debug!("Frame {} was not loaded: {}", src, e),
        }
        element
    }

    fn report_inline_scripts(&self, page: &Page, scripts: &[String]) {
        if scripts.is_empty() || !self.lock().javascript_enabled {
            return;
        }
        let listener = self
            .scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(listener) = listener else {
            return;
        };
        for (index, source) in scripts.iter().enumerate() {
            let verdict = listener.script_compiled(&ScriptCompilation {
                origin: page.url.clone(),
                name: format!("{}#inline-{}", page.url, index + 1),
                source: source.clone(),
                generated: false,
                stack_depth: 0,
                parent_depth: 0,
            });
            if let ScriptVerdict::Abort(reason) = verdict {
                debug!("Script {} of {} stopped: {}", index + 1, page.url, reason);
            }
        }
    }

    fn refresh_target(&self, page: &Page) -> Option<String> {
        self.lock().refresh.get(&page.id).cloned()
    }
}

impl Engine for HttpEngine {
    fn configure(&self, options: EngineOptions, windows: Arc<dyn WindowListener>, scripts: Arc<dyn ScriptListener>) {
        self.windows.set_listener(windows);
        *self.scripts.lock().unwrap_or_else(PoisonError::into_inner) = Some(scripts);

        let client = match build_client(&options, Arc::clone(&self.cookies)) {
            Ok(client) => Some(client),
            Err(e) => {
                warn!("Couldn't configure HTTP client: {}", e);
                None
            }
        };
        let mut state = self.lock();
        state.client = client;
        state.javascript_enabled = options.javascript_enabled;
        state.options = options;
    }

    fn get_page(&self, request: &PageRequest) -> Result<Page, FetchError> {
        let window = request.window.unwrap_or(TOP_WINDOW);
        let (limit, page_timeout) = {
            let state = self.lock();
            (state.options.meta_refresh_limit, state.options.page_timeout)
        };
        let started = Instant::now();

        let mut page = self.load(window, &request.url, &request.headers, 0)?;
        let mut hops = 0;
        while hops < limit {
            if page_timeout.is_some_and(|timeout| started.elapsed() >= timeout) {
                break;
            }
            let Some(target) = self.refresh_target(&page) else {
                break;
            };
            if target == page.url {
                break;
            }
            match self.load(window, &target, &request.headers, 0) {
                Ok(next) => page = next,
                Err(e) => {
                    debug!("Refresh from {} to {} failed: {}", page.url, target, e);
                    break;
                }
            }
            hops += 1;
        }
        Ok(page)
    }

    fn download(&self, request: &PageRequest) -> Result<Arc<WebResponse>, FetchError> {
        self.request(&request.url, &request.headers).map(Arc::new)
    }

    fn elements(&self, page: PageId) -> Vec<DomElement> {
        self.lock().elements.get(&page).cloned().unwrap_or_default()
    }

    fn wait_for_background_scripts(&self, _timeout: Duration) -> usize {
        0
    }

    fn set_javascript_enabled(&self, enabled: bool) {
        self.lock().javascript_enabled = enabled;
    }

    fn stop_javascript(&self) {
        self.lock().javascript_enabled = false;
    }

    fn close_all_windows(&self) {
        self.windows.close_all();
        let mut state = self.lock();
        state.elements.clear();
        state.refresh.clear();
    }

    fn cookies(&self) -> Vec<Cookie> {
        let mut cookies: Vec<Cookie> = self
            .cookie_store()
            .iter_unexpired()
            .map(|cookie| Cookie {
                name: cookie.name().to_string(),
                value: cookie.value().to_string(),
                domain: cookie.domain().unwrap_or_default().trim_start_matches('.').to_string(),
                path: cookie.path().unwrap_or("/").to_string(),
                secure: cookie.secure().unwrap_or(false),
            })
            .collect();
        cookies.extend(self.lock().unbound_cookies.iter().cloned());
        cookies
    }

    fn add_cookie(&self, cookie: Cookie) {
        let domain = cookie.domain.trim_start_matches('.');
        if domain.is_empty() {
            self.lock().unbound_cookies.push(cookie);
            return;
        }
        let scheme = if cookie.secure { "https" } else { "http" };
        match Url::parse(&format!("{}://{}/", scheme, domain)) {
            // Domain attributes don't apply to IP hosts
            Ok(url) => self.insert_cookie(&cookie, &url, domain.parse::<IpAddr>().is_err()),
            Err(e) => warn!("Ignoring cookie {} for domain {}: {}", cookie.name, domain, e),
        }
    }
}

fn build_client(options: &EngineOptions, cookies: Arc<CookieStoreMutex>) -> Result<Client, reqwest::Error> {
    let redirect = if options.follow_redirects {
        Policy::limited(10)
    } else {
        Policy::none()
    };
    let mut builder = Client::builder()
        .user_agent(USER_AGENT)
        .redirect(redirect)
        .cookie_provider(cookies)
        .danger_accept_invalid_certs(options.insecure_ssl)
        .pool_idle_timeout(Duration::from_secs(90))
        .tcp_keepalive(Duration::from_secs(60));

    if let Some(timeout) = options.page_timeout {
        builder = builder.timeout(timeout).connect_timeout(timeout);
    }

    if let Some(proxy) = &options.proxy {
        let mut client_proxy = reqwest::Proxy::all(proxy.proxy_url())?;
        if let Some(username) = &proxy.username {
            client_proxy = client_proxy.basic_auth(username, proxy.password.as_deref().unwrap_or_default());
        }
        builder = builder.proxy(client_proxy);
    }

    builder.build()
}

fn fetch_error(url: &str, host: &str, error: &reqwest::Error) -> FetchError {
    if error.is_timeout() {
        return FetchError::SocketTimeout(url.to_string());
    }
    if error.is_connect() {
        let mut source = error.source();
        while let Some(cause) = source {
            let text = cause.to_string().to_lowercase();
            if text.contains("dns") || text.contains("lookup") || text.contains("name or service not known") {
                return FetchError::UnknownHost(host.to_string());
            }
            if text.contains("timed out") {
                return FetchError::ConnectTimeout(url.to_string());
            }
            source = cause.source();
        }
        return FetchError::Connection(url.to_string());
    }
    FetchError::Io(error.to_string())
}

/// Delay and target of a `<meta http-equiv="refresh">` content value such as
/// `5; url=/next`.
fn parse_refresh(content: &str) -> Option<Refresh> {
    let mut parts = content.split([';', ',']);
    let delay = parts
        .next()?
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|d| d.is_finite() && *d >= 0.0 && *d <= f64::from(u32::MAX))?;
    let target = parts
        .map(str::trim)
        .find_map(|part| {
            let (key, value) = part.split_once('=')?;
            key.trim()
                .eq_ignore_ascii_case("url")
                .then(|| value.trim().trim_matches(['\'', '"']).to_string())
        })
        .filter(|target| !target.is_empty())?;
    Some(Refresh {
        delay: Duration::from_secs_f64(delay),
        target,
    })
}

fn parse_document(html: &str) -> ParsedDocument {
    let document = Html::parse_document(html);
    let mut parsed = ParsedDocument::default();

    for node in document.root_element().descendants() {
        let Some(element) = ElementRef::wrap(node) else {
            continue;
        };
        let value = element.value();
        let mut dom = DomElement::new(value.name());
        for (name, attr) in value.attrs() {
            dom = dom.with_attr(name, attr);
        }
        if element
            .ancestors()
            .filter_map(ElementRef::wrap)
            .any(|ancestor| ancestor.value().name() == "head")
        {
            dom = dom.in_head();
        }

        if dom.tag == "meta"
            && parsed.refresh.is_none()
            && dom
                .attr("http-equiv")
                .is_some_and(|equiv| equiv.eq_ignore_ascii_case("refresh"))
        {
            parsed.refresh = dom.attr("content").and_then(parse_refresh);
        }
        if dom.tag == "script" && dom.attr("src").is_none() {
            let source: String = element.text().collect();
            if !source.trim().is_empty() {
                parsed.inline_scripts.push(source);
            }
        }
        parsed.elements.push(dom);
    }
    parsed
}
