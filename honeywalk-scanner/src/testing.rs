// Scripted in-process engine for exercising the worker without a network
//
// Routes map a URL to a canned page. Loading a route fires the same window
// and script events a real engine would: frames open as blank frame windows
// first, client redirects replace the page in the same window.

use crate::engine::{
    Cookie, DomElement, Engine, EngineOptions, Page, PageId, PageKind, PageRequest, ScriptCompilation, ScriptListener,
    ScriptVerdict, WebResponse, WindowId, WindowListener,
};
use crate::error::FetchError;
use crate::links::resolve;
use crate::windows::{TOP_WINDOW, WindowRegistry};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone)]
pub struct ScriptedPage {
    status: u16,
    status_message: String,
    content_type: String,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
    elements: Vec<DomElement>,
    client_redirect: Option<String>,
    scripts: Vec<(String, String, usize)>,
    cookies: Vec<Cookie>,
    background_scripts: usize,
    background_wait: Duration,
    dom_delay: Option<Duration>,
    delay: Option<Duration>,
    panic_message: Option<String>,
    error: Option<FetchError>,
}

impl ScriptedPage {
    fn new(status: u16, content_type: &str, body: &[u8]) -> Self {
        Self {
            status,
            status_message: if status == 200 { "OK".into() } else { String::new() },
            content_type: content_type.to_string(),
            headers: Vec::new(),
            body: body.to_vec(),
            elements: Vec::new(),
            client_redirect: None,
            scripts: Vec::new(),
            cookies: Vec::new(),
            background_scripts: 0,
            background_wait: Duration::ZERO,
            dom_delay: None,
            delay: None,
            panic_message: None,
            error: None,
        }
    }

    pub fn html(body: &str) -> Self {
        Self::new(200, "text/html", body.as_bytes())
    }

    pub fn text(body: &str) -> Self {
        Self::new(200, "text/plain", body.as_bytes())
    }

    pub fn binary(content_type: &str, body: &[u8]) -> Self {
        Self::new(200, content_type, body)
    }

    pub fn redirect(status: u16, location: &str) -> Self {
        Self::new(status, "text/html", b"").with_header("Location", location)
    }

    pub fn failing(error: FetchError) -> Self {
        let mut page = Self::new(0, "", b"");
        page.error = Some(error);
        page
    }

    pub fn with_status(mut self, status: u16, message: &str) -> Self {
        self.status = status;
        self.status_message = message.to_string();
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_element(mut self, element: DomElement) -> Self {
        self.elements.push(element);
        self
    }

    /// A `frame`/`iframe` element; the engine loads `src` into a frame window
    /// when a route for it exists.
    pub fn with_frame(self, tag: &str, src: &str) -> Self {
        self.with_element(DomElement::new(tag).with_attr("src", src))
    }

    /// Replaces the page in its window once loaded, like a meta refresh.
    pub fn with_client_redirect(mut self, url: &str) -> Self {
        self.client_redirect = Some(url.to_string());
        self
    }

    pub fn with_script(mut self, name: &str, source: &str) -> Self {
        self.scripts.push((name.to_string(), source.to_string(), 0));
        self
    }

    pub fn with_script_at_depth(mut self, name: &str, source: &str, stack_depth: usize) -> Self {
        self.scripts.push((name.to_string(), source.to_string(), stack_depth));
        self
    }

    pub fn with_cookie(mut self, name: &str, value: &str) -> Self {
        self.cookies.push(Cookie {
            name: name.to_string(),
            value: value.to_string(),
            domain: String::new(),
            path: "/".to_string(),
            secure: false,
        });
        self
    }

    pub fn with_background_scripts(mut self, running: usize) -> Self {
        self.background_scripts = running;
        self
    }

    /// Background scripts that keep the wait busy for `wait`, or for the
    /// caller's timeout if that is shorter.
    pub fn with_slow_background_scripts(mut self, running: usize, wait: Duration) -> Self {
        self.background_scripts = running;
        self.background_wait = wait;
        self
    }

    /// `elements` blocks this long for the page.
    pub fn with_dom_delay(mut self, delay: Duration) -> Self {
        self.dom_delay = Some(delay);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn panicking(mut self, message: &str) -> Self {
        self.panic_message = Some(message.to_string());
        self
    }

    fn response_for(&self, url: &str) -> WebResponse {
        let mut response_headers = self.headers.clone();
        if !self.content_type.is_empty() {
            response_headers.push(("Content-Type".to_string(), self.content_type.clone()));
        }
        WebResponse {
            status: self.status,
            status_message: self.status_message.clone(),
            content_type: self.content_type.clone(),
            request_url: url.to_string(),
            request_headers: vec![("Host".to_string(), host_of(url))],
            response_headers,
            body: self.body.clone(),
        }
    }
}

fn host_of(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| url.to_string())
}

#[derive(Default)]
struct ScriptedState {
    routes: HashMap<String, ScriptedPage>,
    elements: HashMap<PageId, Vec<DomElement>>,
    background: HashMap<PageId, (usize, Duration)>,
    dom_delays: HashMap<PageId, Duration>,
    last_page: Option<PageId>,
    cookies: Vec<Cookie>,
    requests: Vec<String>,
    verdicts: Vec<ScriptVerdict>,
    options: Option<EngineOptions>,
    javascript_enabled: bool,
    stop_count: usize,
    close_count: usize,
}

#[derive(Default)]
pub struct ScriptedEngine {
    state: Mutex<ScriptedState>,
    windows: WindowRegistry,
    scripts: Mutex<Option<Arc<dyn ScriptListener>>>,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_route(self, url: &str, page: ScriptedPage) -> Self {
        self.lock().routes.insert(url.to_string(), page);
        self
    }

    fn lock(&self) -> MutexGuard<'_, ScriptedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// URLs passed to `get_page` and `download`, in order.
    pub fn requests(&self) -> Vec<String> {
        self.lock().requests.clone()
    }

    pub fn options(&self) -> Option<EngineOptions> {
        self.lock().options.clone()
    }

    pub fn verdicts(&self) -> Vec<ScriptVerdict> {
        self.lock().verdicts.clone()
    }

    pub fn stop_count(&self) -> usize {
        self.lock().stop_count
    }

    pub fn close_count(&self) -> usize {
        self.lock().close_count
    }

    fn route(&self, url: &str) -> Option<ScriptedPage> {
        self.lock().routes.get(url).cloned()
    }

    fn admit(&self, url: &str) -> Result<ScriptedPage, FetchError> {
        let route = self
            .route(url)
            .ok_or_else(|| FetchError::UnknownHost(host_of(url)))?;
        if let Some(delay) = route.delay {
            std::thread::sleep(delay);
        }
        if let Some(message) = &route.panic_message {
            panic!("{}", message);
        }
        match &route.error {
            Some(error) => Err(error.clone()),
            None => Ok(route),
        }
    }

    fn load(&self, window: WindowId, url: &str, route: ScriptedPage, refresh_budget: usize) -> Page {
        let kind = PageKind::from_content_type(&route.content_type);
        let page = self
            .windows
            .show(window, url, kind, Arc::new(route.response_for(url)));

        {
            let mut state = self.lock();
            state.cookies.extend(route.cookies.iter().cloned());
            state
                .background
                .insert(page.id, (route.background_scripts, route.background_wait));
            if let Some(delay) = route.dom_delay {
                state.dom_delays.insert(page.id, delay);
            }
        }
        self.compile_scripts(&page, &route);

        let elements = route
            .elements
            .iter()
            .map(|element| self.load_frame(&page, element, refresh_budget))
            .collect();
        self.lock().elements.insert(page.id, elements);

        if let Some(target) = &route.client_redirect
            && refresh_budget > 0
            && let Some(target_url) = resolve(url, target)
            && let Ok(next) = self.admit(&target_url)
        {
            return self.load(window, &target_url, next, refresh_budget - 1);
        }
        page
    }

    fn load_frame(&self, page: &Page, element: &DomElement, refresh_budget: usize) -> DomElement {
        let mut element = element.clone();
        if element.tag != "frame" && element.tag != "iframe" {
            return element;
        }
        let Some(src) = element.attr("src").and_then(|src| resolve(&page.url, src)) else {
            return element;
        };
        if !(src.starts_with("http://") || src.starts_with("https://")) {
            return element;
        }
        if let Ok(route) = self.admit(&src) {
            let frame = self.windows.open_frame();
            let loaded = self.load(frame, &src, route, refresh_budget);
            element.enclosed_page = Some(loaded.id);
        }
        element
    }

    fn compile_scripts(&self, page: &Page, route: &ScriptedPage) {
        if !self.lock().javascript_enabled {
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
        for (name, source, depth) in &route.scripts {
            let verdict = listener.script_compiled(&ScriptCompilation {
                origin: page.url.clone(),
                name: name.clone(),
                source: source.clone(),
                generated: false,
                stack_depth: *depth,
                parent_depth: 0,
            });
            self.lock().verdicts.push(verdict);
        }
    }
}

impl Engine for ScriptedEngine {
    fn configure(&self, options: EngineOptions, windows: Arc<dyn WindowListener>, scripts: Arc<dyn ScriptListener>) {
        self.windows.set_listener(windows);
        *self.scripts.lock().unwrap_or_else(PoisonError::into_inner) = Some(scripts);
        let mut state = self.lock();
        state.javascript_enabled = options.javascript_enabled;
        state.options = Some(options);
    }

    fn get_page(&self, request: &PageRequest) -> Result<Page, FetchError> {
        self.lock().requests.push(request.url.clone());
        let route = self.admit(&request.url)?;
        let budget = self
            .lock()
            .options
            .as_ref()
            .map(|o| o.meta_refresh_limit)
            .unwrap_or(10);
        let window = request.window.unwrap_or(TOP_WINDOW);
        let page = self.load(window, &request.url, route, budget);
        let current = self.windows.current_page(window).unwrap_or(page);
        self.lock().last_page = Some(current.id);
        Ok(current)
    }

    fn download(&self, request: &PageRequest) -> Result<Arc<WebResponse>, FetchError> {
        self.lock().requests.push(request.url.clone());
        let route = self.admit(&request.url)?;
        Ok(Arc::new(route.response_for(&request.url)))
    }

    fn elements(&self, page: PageId) -> Vec<DomElement> {
        let delay = self.lock().dom_delays.get(&page).copied();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        self.lock().elements.get(&page).cloned().unwrap_or_default()
    }

    fn wait_for_background_scripts(&self, timeout: Duration) -> usize {
        let pending = {
            let mut state = self.lock();
            let page = state.last_page;
            page.and_then(|page| state.background.remove(&page))
        };
        let Some((running, wait)) = pending else {
            return 0;
        };
        std::thread::sleep(wait.min(timeout));
        running
    }

    fn set_javascript_enabled(&self, enabled: bool) {
        self.lock().javascript_enabled = enabled;
    }

    fn stop_javascript(&self) {
        let mut state = self.lock();
        state.stop_count += 1;
        state.javascript_enabled = false;
    }

    fn close_all_windows(&self) {
        self.lock().close_count += 1;
        self.windows.close_all();
    }

    fn cookies(&self) -> Vec<Cookie> {
        self.lock().cookies.clone()
    }

    fn add_cookie(&self, cookie: Cookie) {
        self.lock().cookies.push(cookie);
    }
}
