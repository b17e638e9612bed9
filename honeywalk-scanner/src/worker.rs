// Crawl worker: drives the engine through one task and fills the crawl tree
//
// The worker runs on its own thread. Every network operation goes through
// `on_engine`, which hands the blocking engine call to the runtime's blocking pool
// and races it against the page timeout and the task's cancel token.

use crate::chain::{ProcessedPage, SharedPageChains};
use crate::engine::{
    ABOUT_BLANK, Cookie, DomElement, Engine, EngineOptions, HOME_PAGE, Page, PageKind, PageRequest, WebResponse,
    is_server_redirect_status,
};
use crate::error::{CrawlError, FetchError, LimitExceeded, StoreError};
use crate::follower::{FailureLog, TreeCheckpoint};
use crate::input::NodeInput;
use crate::links::{LinkType, is_proper_url, resolve};
use crate::object::{NewObject, ObjectType, Origin, now_millis};
use crate::params::CrawlParams;
use crate::proxy::ProxyConfig;
use crate::scripts::SharedScriptRegistry;
use crate::store::{CookieRecord, DataStoreHelper, ObjectStore, RequestRecord};
use crate::tree::CrawlTree;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

const PAGE_UNAVAILABLE: &str = "Unable to access page content. Response or page are unavailable.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Idle,
    Running,
    Completed,
    TimedOut,
    Failed,
    CleanedUp,
}

/// What a tag contributes when it is met during inspection.
#[derive(Debug, Clone, Copy)]
enum Action {
    Embed(LinkType, &'static str),
    /// `html manifest`: embedded, but doesn't invalidate a later BASE tag.
    Manifest,
    Object(&'static str),
    ObjectIfUrl(&'static str),
    Outgoing(Origin, &'static str),
    InputImage,
    LinkRel,
    Frame(Origin),
    Base,
}

struct TagRule {
    tag: &'static str,
    actions: &'static [Action],
}

static TAG_RULES: &[TagRule] = &[
    TagRule { tag: "base", actions: &[Action::Base] },
    TagRule { tag: "applet", actions: &[Action::Object("code"), Action::Object("classid")] },
    TagRule { tag: "audio", actions: &[Action::Embed(LinkType::Multimedia, "src")] },
    TagRule { tag: "body", actions: &[Action::Embed(LinkType::Image, "background")] },
    TagRule { tag: "command", actions: &[Action::Embed(LinkType::Image, "icon")] },
    TagRule { tag: "embed", actions: &[Action::Object("src")] },
    TagRule { tag: "html", actions: &[Action::Manifest] },
    TagRule {
        tag: "img",
        actions: &[Action::Embed(LinkType::Image, "src"), Action::Outgoing(Origin::Longdesc, "longdesc")],
    },
    TagRule { tag: "input", actions: &[Action::InputImage] },
    TagRule { tag: "link", actions: &[Action::LinkRel] },
    TagRule { tag: "object", actions: &[Action::Object("data"), Action::ObjectIfUrl("classid")] },
    TagRule {
        tag: "video",
        actions: &[Action::Embed(LinkType::Image, "poster"), Action::Embed(LinkType::Multimedia, "src")],
    },
    TagRule { tag: "script", actions: &[Action::Embed(LinkType::Other, "src")] },
    TagRule { tag: "source", actions: &[Action::Embed(LinkType::Multimedia, "src")] },
    TagRule { tag: "a", actions: &[Action::Outgoing(Origin::Link, "href")] },
    TagRule { tag: "area", actions: &[Action::Outgoing(Origin::Link, "href")] },
    TagRule { tag: "frame", actions: &[Action::Frame(Origin::Frame)] },
    TagRule { tag: "iframe", actions: &[Action::Frame(Origin::Iframe)] },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SubPage {
    Skipped,
    Opened { supported: bool },
}

fn is_supported_scheme(url: &str) -> bool {
    Url::parse(url).is_ok_and(|u| matches!(u.scheme(), "http" | "https"))
}

pub struct CrawlWorker {
    engine: Arc<dyn Engine>,
    store: Arc<dyn ObjectStore>,
    job: u64,
    params: CrawlParams,
    runtime: Handle,
    chains: SharedPageChains,
    scripts: SharedScriptRegistry,
    cancel: CancellationToken,
    failures: FailureLog,
    checkpoint: TreeCheckpoint,
    state: WorkerState,
    processed_sub_pages: HashSet<String>,
    cookies: Vec<Cookie>,
}

impl CrawlWorker {
    pub fn new(
        engine: Arc<dyn Engine>,
        store: Arc<dyn ObjectStore>,
        job: u64,
        params: CrawlParams,
        runtime: Handle,
    ) -> Self {
        let scripts = SharedScriptRegistry::new(params.js_recursion_limit);
        Self {
            engine,
            store,
            job,
            params,
            runtime,
            chains: SharedPageChains::new(),
            scripts,
            cancel: CancellationToken::new(),
            failures: FailureLog::new(),
            checkpoint: TreeCheckpoint::new(),
            state: WorkerState::Idle,
            processed_sub_pages: HashSet::new(),
            cookies: Vec::new(),
        }
    }

    pub fn with_cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_failure_log(mut self, failures: FailureLog) -> Self {
        self.failures = failures;
        self
    }

    /// Receives a copy of the tree after the root fetch and after every sub-page.
    pub fn with_checkpoint(mut self, checkpoint: TreeCheckpoint) -> Self {
        self.checkpoint = checkpoint;
        self
    }

    /// Cookies loaded into the engine before the first fetch.
    pub fn with_cookies(mut self, cookies: Vec<Cookie>) -> Self {
        self.cookies = cookies;
        self
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn failures(&self) -> &FailureLog {
        &self.failures
    }

    pub fn chains(&self) -> &SharedPageChains {
        &self.chains
    }

    /// Processes the task URL into `tree` and tears the engine down. Returns
    /// how processing ended; the worker itself is `CleanedUp` afterwards.
    pub fn run(&mut self, tree: &mut CrawlTree) -> WorkerState {
        self.state = WorkerState::Running;
        let url = tree.task_input().url_for_processing().to_string();
        self.configure_engine(tree.task_input());
        info!("Processing {}", url);

        let outcome = match self.process_the_url(tree) {
            Ok(()) if self.cancel.is_cancelled() => WorkerState::TimedOut,
            Ok(()) => WorkerState::Completed,
            Err(e) => {
                warn!("Processing of {} failed: {}", url, e);
                self.failures.request_failed(e.to_string());
                match e {
                    CrawlError::Fetch(FetchError::Interrupted(_)) => WorkerState::TimedOut,
                    _ => WorkerState::Failed,
                }
            }
        };
        self.state = outcome;
        self.teardown(tree);
        outcome
    }

    /// Stops scripts, closes windows and hands captured scripts to the tree.
    /// Safe to call more than once.
    pub fn teardown(&mut self, tree: &mut CrawlTree) {
        self.engine.stop_javascript();
        self.scripts.disable_processing();
        self.engine.close_all_windows();
        tree.attach_scripts(self.scripts.take_sources());
        self.state = WorkerState::CleanedUp;
    }

    fn configure_engine(&mut self, input: &NodeInput) {
        let proxy = input.proxy.as_deref().and_then(ProxyConfig::parse);
        if let Some(proxy) = &proxy {
            info!("Using proxy {}", proxy);
        }
        let options = EngineOptions {
            javascript_enabled: self.params.js_enable,
            page_timeout: self.params.page_timeout(),
            script_timeout: self.params.single_js_timeout(),
            profile: self.params.profile.clone(),
            proxy,
            insecure_ssl: true,
            follow_redirects: false,
            home_page: HOME_PAGE.to_string(),
            meta_refresh_limit: self.params.redirect_depth_limit,
        };
        self.engine.configure(
            options,
            Arc::new(self.chains.clone()),
            Arc::new(self.scripts.clone()),
        );
        for cookie in self.cookies.drain(..) {
            self.engine.add_cookie(cookie);
        }
    }

    fn process_the_url(&mut self, tree: &mut CrawlTree) -> Result<(), CrawlError> {
        let url = tree.task_input().url_for_processing().to_string();
        debug!("Gathering page {}", url);
        let started = Instant::now();

        let download_start = now_millis();
        let page = self.fetch(PageRequest::new(&url))?;
        tree.add_time_attribute("download_time_start", download_start);
        tree.add_time_attribute("download_time_end", now_millis());
        self.checkpoint.save(tree);

        let chain = self
            .chains
            .lookup_chain(&page, false)?
            .with_original_url(tree.task_input().url_original());
        self.process_page(tree, chain);

        debug!("Processing of {} took {} ms", url, started.elapsed().as_millis());
        Ok(())
    }

    fn fetch(&self, request: PageRequest) -> Result<Page, FetchError> {
        let url = request.url.clone();
        self.on_engine(url, self.params.page_timeout(), move |engine| engine.get_page(&request))
    }

    fn download(&self, url: &str) -> Result<Arc<WebResponse>, FetchError> {
        let request = PageRequest::new(url);
        self.on_engine(url.to_string(), self.params.page_timeout(), move |engine| {
            engine.download(&request)
        })
    }

    /// Waits for scripts still running on the page, unless the task is cancelled first.
    fn wait_for_background_scripts(&self, url: &str) {
        let timeout = self.params.background_js_timeout();
        match self.on_engine(url.to_string(), None, move |engine| {
            Ok(engine.wait_for_background_scripts(timeout))
        }) {
            Ok(0) => {}
            Ok(running) => warn!("There are still {} javascripts running in background", running),
            Err(e) => debug!("Stopped waiting for background javascripts: {}", e),
        }
    }

    /// Runs an engine call on the blocking pool, racing it against `deadline`
    /// and the cancel token. An abandoned call keeps running until the engine
    /// gives up on it; nobody waits for it.
    fn on_engine<T, F>(&self, url: String, deadline: Option<Duration>, call: F) -> Result<T, FetchError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn Engine) -> Result<T, FetchError> + Send + 'static,
    {
        if self.cancel.is_cancelled() {
            debug!("Time limit exceeded. {} won't be processed", url);
            return Err(FetchError::Interrupted(url));
        }

        let engine = Arc::clone(&self.engine);
        let millis = deadline.map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX));
        let cancel = self.cancel.clone();

        self.runtime.block_on(async move {
            let load = tokio::task::spawn_blocking(move || call(engine.as_ref()));
            let deadline = async {
                match deadline {
                    Some(timeout) => tokio::time::sleep(timeout).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                joined = load => match joined {
                    Ok(result) => result,
                    Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                    Err(e) => Err(FetchError::Engine(e.to_string())),
                },
                _ = deadline => Err(FetchError::Timeout { url: url.clone(), millis }),
                _ = cancel.cancelled() => Err(FetchError::Interrupted(url.clone())),
            }
        })
    }

    fn restart_javascript(&self) {
        self.engine.stop_javascript();
        self.engine.set_javascript_enabled(self.params.js_enable);
        debug!("JavaScript was restarted");
    }

    fn process_page(&mut self, tree: &mut CrawlTree, mut chain: ProcessedPage) {
        self.wait_for_background_scripts(chain.actual_url());
        self.restart_javascript();

        let mut reason = None;
        if let Some(next) = chain.take_client_redirect() {
            self.process_client_redirect(tree, next);
            self.handle_page(tree, &chain);
        } else if let Some(location) = chain.server_redirect_location().map(str::to_string) {
            if let Err(e) = self.process_server_redirect(tree, &chain, &location) {
                error!("Broken page chain: {}", e);
                reason = Some(format!(
                    "Error when processing {} (requested: {}). Some data may be lost!",
                    chain.actual_url(),
                    chain.requested_url()
                ));
            }
        } else {
            self.handle_page(tree, &chain);
        }

        self.add_required_attributes(tree, Some(&chain), reason.as_deref());
        chain.clean_page();
    }

    fn process_client_redirect(&mut self, tree: &mut CrawlTree, next: ProcessedPage) {
        let url = next.actual_url().to_string();
        self.with_sub_page(tree, &url, Origin::ClientRedirect, |worker, tree, supported| {
            if supported {
                worker.process_page(tree, next);
            } else {
                worker.report_unsupported(tree, &url);
            }
        });
    }

    fn process_server_redirect(
        &mut self,
        tree: &mut CrawlTree,
        chain: &ProcessedPage,
        location: &str,
    ) -> Result<(), CrawlError> {
        let request = PageRequest::new(location).in_window(chain.page().window);
        let is_frame = chain.is_from_frame();
        let mut outcome = Ok(());

        self.with_sub_page(tree, location, Origin::ServerRedirect, |worker, tree, supported| {
            if !supported {
                worker.report_unsupported(tree, location);
                return;
            }
            match worker.fetch(request) {
                Ok(page) => match worker.chains.lookup_chain(&page, is_frame) {
                    Ok(next) => worker.process_page(tree, next.with_original_url(location)),
                    Err(e) => outcome = Err(e.into()),
                },
                Err(e) => {
                    warn!("Gathering {} failed: {}", location, e);
                    worker.add_required_attributes(tree, None, Some(&e.to_string()));
                }
            }
        });
        outcome
    }

    fn handle_page(&mut self, tree: &mut CrawlTree, chain: &ProcessedPage) {
        match chain.page().kind {
            PageKind::Html => {
                debug!("Got HTML page, processing (url={})", chain.requested_url());
                self.inspect(tree, chain);
            }
            PageKind::Text => tree.add_attribute("html", false),
            PageKind::Other => warn!(
                "Unsupported page type ({}) while parsing URL ({})",
                chain.content_type(),
                chain.requested_url()
            ),
        }
    }

    fn inspect(&mut self, tree: &mut CrawlTree, chain: &ProcessedPage) {
        tree.page_links().set_base_url(chain.actual_url());
        for element in self.engine.elements(chain.page_id()) {
            if self.cancel.is_cancelled() {
                debug!("Element [{}] won't be processed (timeout)", element.tag);
                continue;
            }
            let Some(rule) = TAG_RULES.iter().find(|rule| rule.tag == element.tag) else {
                continue;
            };
            for action in rule.actions {
                self.apply(tree, &element, *action);
            }
        }
        self.resolve_embedded(tree);
    }

    fn apply(&mut self, tree: &mut CrawlTree, element: &DomElement, action: Action) {
        match action {
            Action::Embed(link_type, attr) => {
                tree.page_links().ignore_base_tag();
                if let Some(value) = element.attr(attr) {
                    tree.page_links().add_embedded(link_type, value);
                }
            }
            Action::Manifest => {
                if let Some(value) = element.attr("manifest") {
                    tree.page_links().add_embedded(LinkType::Other, value);
                }
            }
            Action::Object(attr) => {
                let links = tree.page_links();
                links.ignore_base_tag();
                if let Some(value) = element.attr(attr) {
                    links.add_object(value, element.attr("codebase"), element.attr("archive"));
                }
            }
            Action::ObjectIfUrl(attr) => {
                let is_url = element.attr(attr).is_some_and(|value| {
                    let value = value.to_lowercase();
                    value.starts_with("http:") || value.starts_with("https:")
                });
                if is_url {
                    self.apply(tree, element, Action::Object(attr));
                }
            }
            Action::Outgoing(origin, attr) => {
                tree.page_links().ignore_base_tag();
                if let Some(value) = element.attr(attr) {
                    tree.add_outgoing_link(origin, value);
                }
            }
            Action::InputImage => {
                if element.attr("type").is_some_and(|t| t.eq_ignore_ascii_case("image")) {
                    self.apply(tree, element, Action::Embed(LinkType::Image, "src"));
                }
            }
            Action::LinkRel => {
                let rel = element.attr("rel").unwrap_or("").trim().to_lowercase();
                match rel.as_str() {
                    "stylesheet" => self.apply(tree, element, Action::Embed(LinkType::Other, "href")),
                    "icon" | "shortcut icon" => self.apply(tree, element, Action::Embed(LinkType::Image, "href")),
                    _ => {}
                }
            }
            Action::Frame(origin) => {
                tree.page_links().ignore_base_tag();
                self.process_frame(tree, element, origin);
            }
            Action::Base => self.process_base(tree, element),
        }
    }

    fn process_base(&self, tree: &mut CrawlTree, element: &DomElement) {
        let links = tree.page_links();
        if links.is_base_tag_ignored() {
            return;
        }
        if !element.inside_head {
            debug!("BASE element outside of HEAD, ignoring further BASE tags");
            links.ignore_base_tag();
            return;
        }
        if let Some(href) = element.attr("href").map(str::trim)
            && is_proper_url(href)
        {
            let base = if href.ends_with('/') {
                href.to_string()
            } else {
                format!("{}/", href)
            };
            links.set_base_url(base);
        }
    }

    fn process_frame(&mut self, tree: &mut CrawlTree, element: &DomElement, origin: Origin) {
        let chain = element
            .enclosed_page
            .and_then(|page| self.chains.frame_chain(page));

        if let Some(chain) = chain {
            let url = chain.actual_url().to_string();
            self.with_sub_page(tree, &url, origin, |worker, tree, supported| {
                if supported {
                    worker.process_page(tree, chain);
                } else {
                    worker.report_unsupported(tree, &url);
                }
            });
            return;
        }

        // The engine leaves a frame it couldn't follow unloaded; the node is
        // still recorded with the URL from the source.
        let src = element.attr("src").unwrap_or("").trim();
        let base = tree.page_links().base_url().to_string();
        let (url, reason) = if src.is_empty() {
            (ABOUT_BLANK.to_string(), format!("Src for {} is empty.", origin))
        } else {
            match resolve(&base, src) {
                Some(url) => (url, format!("Unable to follow url from {}", origin)),
                None => (ABOUT_BLANK.to_string(), format!("Can't create Link for {}", origin)),
            }
        };
        self.with_sub_page(tree, &url, origin, |worker, tree, _| {
            worker.add_required_attributes(tree, None, Some(&reason));
        });
    }

    /// Opens a sub-context for `url`, runs `body` in it and closes it again.
    /// `body` is told whether the URL has a scheme the crawl can follow.
    fn with_sub_page<F>(&mut self, tree: &mut CrawlTree, url: &str, origin: Origin, body: F)
    where
        F: FnOnce(&mut Self, &mut CrawlTree, bool),
    {
        if self.cancel.is_cancelled() {
            debug!("{} won't be processed (timeout)", url);
            return;
        }
        match self.prepare_sub_page(tree, url, origin) {
            Ok(SubPage::Skipped) => {}
            Ok(SubPage::Opened { supported }) => {
                body(self, tree, supported);
                tree.close_sub_context();
                self.checkpoint.save(tree);
            }
            Err(e) => debug!("Couldn't open subcontext for {}: {}", url, e),
        }
    }

    fn prepare_sub_page(&mut self, tree: &mut CrawlTree, url: &str, origin: Origin) -> Result<SubPage, LimitExceeded> {
        let seen = !self.processed_sub_pages.insert(url.to_string());
        if seen && !self.params.save_multiple && url != ABOUT_BLANK {
            debug!("({}) already processed, skipping", url);
            return Ok(SubPage::Skipped);
        }

        let referrer = tree
            .current_input()
            .unwrap_or(tree.task_input())
            .url_for_processing()
            .to_string();
        let referrer_cookie = tree.cookies_reference_id();

        tree.open_sub_context()?;
        tree.add_attribute("type", ObjectType::Url.as_str());
        tree.add_attribute("origin", origin.as_str());
        tree.add_attribute("url_original", url);
        tree.web_context_init(url, Some(referrer), referrer_cookie);

        let supported = url == ABOUT_BLANK || is_supported_scheme(url);
        Ok(SubPage::Opened { supported })
    }

    fn report_unsupported(&self, tree: &mut CrawlTree, url: &str) {
        debug!("Protocol not supported (not HTTP/HTTPS): {}", url);
        let reason = FetchError::UnsupportedProtocol(url.to_string()).to_string();
        self.add_required_attributes(tree, None, Some(&reason));
    }

    /// Fetches every embedded resource of the current page, following server
    /// redirects while the tree still has height left.
    fn resolve_embedded(&self, tree: &mut CrawlTree) {
        let first_hop = tree.current_height();
        let hop_limit = self.params.tree_height_limit();
        let links = tree.page_links();
        if links.resources().next().is_none() {
            return;
        }

        for resource in links.resources_mut() {
            let mut url = resource.absolute_url().to_string();
            let mut hops = first_hop;
            loop {
                match self.download(&url) {
                    Ok(response) => {
                        let next = if is_server_redirect_status(response.status) && hops < hop_limit {
                            response.header("location").and_then(|l| resolve(&url, l.trim()))
                        } else {
                            None
                        };
                        match next {
                            Some(next) => {
                                debug!("Embedded resource {} redirects to {}", url, next);
                                hops += 1;
                                url = next;
                            }
                            None => {
                                let failure = (response.status != 200)
                                    .then(|| response.status_message.clone());
                                resource.update(response, failure);
                                break;
                            }
                        }
                    }
                    Err(e) => {
                        warn!("Embedded resource {} not retrieved: {}", url, e);
                        resource.mark_failed(e.to_string());
                        break;
                    }
                }
            }
        }
    }

    fn add_required_attributes(&self, tree: &mut CrawlTree, chain: Option<&ProcessedPage>, reason: Option<&str>) {
        if let Err(e) = self.try_add_required_attributes(tree, chain, reason) {
            error!("Couldn't store crawl data: {}", e);
            self.failures.request_failed(e.to_string());
        }
    }

    fn try_add_required_attributes(
        &self,
        tree: &mut CrawlTree,
        chain: Option<&ProcessedPage>,
        reason: Option<&str>,
    ) -> Result<(), StoreError> {
        let helper = DataStoreHelper::new(self.store.as_ref(), self.job);
        let input = tree.current_input().unwrap_or(tree.task_input()).clone();

        let request = match chain {
            None => RequestRecord::new(input.url_original(), input.url_for_processing()),
            Some(chain) => {
                let record = RequestRecord::new(chain.original_url(), chain.requested_url())
                    .with_request_header(chain.request_headers().to_string());
                if self.failures.is_successful() {
                    record.with_response(chain.status(), chain.response_headers().to_string())
                } else {
                    record
                }
            }
        };
        tree.add_reference("http_request", helper.save_request(&request)?);
        if let Some(referrer) = &input.referrer {
            tree.add_attribute("referrer", referrer.as_str());
        }

        match chain.filter(|c| c.is_complete()) {
            Some(chain) => {
                tree.add_attribute("active", true);
                self.add_success_attributes(tree, &helper, &input, chain)
            }
            None => {
                tree.add_attribute("active", false);
                let reason = reason.filter(|r| !r.is_empty()).unwrap_or(PAGE_UNAVAILABLE);
                tree.add_attribute("reason_failed", reason);
                if let Some(warning) = self.failures.warning() {
                    warn!("Adding warning to task: {}", warning);
                    tree.add_warning(warning);
                }
                Ok(())
            }
        }
    }

    fn add_success_attributes(
        &self,
        tree: &mut CrawlTree,
        helper: &DataStoreHelper<'_>,
        input: &NodeInput,
        chain: &ProcessedPage,
    ) -> Result<(), StoreError> {
        tree.add_attribute("http_code", chain.status());
        tree.add_attribute("html", chain.is_html());
        let content = chain.content().unwrap_or_default();

        if chain.is_html() {
            if self.params.save_html {
                tree.add_time_attribute("download_time_start", now_millis());
                let id = helper.save_content(content)?;
                tree.add_time_attribute("download_time_end", now_millis());
                tree.add_reference("html_source", id);
            }
        } else {
            let start = now_millis();
            let id = helper.save_content(content)?;
            let end = now_millis();
            if chain.status() == 200 {
                let object = NewObject::new(chain.requested_url(), None, ObjectType::File)
                    .with_mime_type(chain.content_type())
                    .with_referrer(input.referrer.clone().filter(|_| self.params.add_referrer))
                    .with_referrer_cookie(input.referrer_cookie_id.filter(|_| self.params.add_referrer_cookie))
                    .with_content(id)
                    .with_download_times(start, end);
                tree.add_new_object(object);
            }
        }

        self.handle_cookies(tree, helper)
    }

    fn handle_cookies(&self, tree: &mut CrawlTree, helper: &DataStoreHelper<'_>) -> Result<(), StoreError> {
        if !self.params.save_cookies {
            return Ok(());
        }
        let mut cookies: Vec<CookieRecord> = self.engine.cookies().iter().map(CookieRecord::from).collect();
        if cookies.is_empty() {
            return Ok(());
        }

        if let Some(id) = tree.task_input().referrer_cookie_id {
            match helper.load_cookies(id) {
                Ok(records) => {
                    for record in records {
                        if !cookies.contains(&record) {
                            cookies.push(record);
                        }
                    }
                }
                Err(e) => warn!("Couldn't load referrer cookies {}: {}", id, e),
            }
        }

        let id = helper.save_cookies(&cookies)?;
        tree.set_cookies_reference_id(id);
        tree.add_reference("cookie_list", id);
        Ok(())
    }
}
