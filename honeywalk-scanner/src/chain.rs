// Redirect chain reconstruction from window events
//
// The engine only says "window W now shows page N instead of page O". From the
// URLs of O and N and whether O was a 3xx response we rebuild which loads were
// client side redirects of one logical navigation.

use crate::engine::{Page, PageId, PageKind, WebResponse, WindowEvent, WindowListener, is_server_redirect_status};
use crate::error::ChainError;
use crate::links::resolve;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

/// One hop of a page chain. Owns at most one client side redirect successor.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedPage {
    page: Page,
    status: u16,
    request_headers: String,
    response_headers: String,
    content_type: String,
    requested_url: String,
    actual_url: String,
    original_url: String,
    server_redirect_location: Option<String>,
    from_frame: bool,
    response: Option<Arc<WebResponse>>,
    client_redirect: Option<Box<ProcessedPage>>,
}

impl ProcessedPage {
    pub fn new(page: Page) -> Self {
        let response = Arc::clone(&page.response);
        let server_redirect_location = if is_server_redirect_status(response.status) {
            response
                .header("location")
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(|l| resolve(&page.url, l).unwrap_or_else(|| l.to_string()))
        } else {
            None
        };

        Self {
            status: response.status,
            request_headers: response.request_headers_text(),
            response_headers: response.response_headers_text(),
            content_type: response.content_type.clone(),
            requested_url: response.request_url.clone(),
            actual_url: page.url.clone(),
            original_url: String::new(),
            server_redirect_location,
            from_frame: page.in_frame,
            response: Some(response),
            client_redirect: None,
            page,
        }
    }

    /// `page` followed by an existing chain.
    pub fn with_client_redirect(page: Page, next: ProcessedPage) -> Self {
        let mut head = Self::new(page);
        head.client_redirect = Some(Box::new(next));
        head
    }

    pub fn with_original_url(mut self, url: impl Into<String>) -> Self {
        self.original_url = url.into();
        self
    }

    pub fn page(&self) -> &Page {
        &self.page
    }

    pub fn page_id(&self) -> PageId {
        self.page.id
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn request_headers(&self) -> &str {
        &self.request_headers
    }

    pub fn response_headers(&self) -> &str {
        &self.response_headers
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn requested_url(&self) -> &str {
        &self.requested_url
    }

    pub fn actual_url(&self) -> &str {
        &self.actual_url
    }

    /// The URL the chain was asked for, falling back to the requested URL.
    pub fn original_url(&self) -> &str {
        if self.original_url.is_empty() {
            &self.requested_url
        } else {
            &self.original_url
        }
    }

    pub fn server_redirect_location(&self) -> Option<&str> {
        self.server_redirect_location.as_deref()
    }

    pub fn is_from_frame(&self) -> bool {
        self.from_frame
    }

    pub fn is_html(&self) -> bool {
        self.page.kind == PageKind::Html
    }

    pub fn is_complete(&self) -> bool {
        self.response.is_some()
    }

    pub fn content(&self) -> Option<&[u8]> {
        self.response.as_ref().map(|r| r.body.as_slice())
    }

    pub fn client_redirect(&self) -> Option<&ProcessedPage> {
        self.client_redirect.as_deref()
    }

    pub fn take_client_redirect(&mut self) -> Option<ProcessedPage> {
        self.client_redirect.take().map(|next| *next)
    }

    pub fn last_page(&self) -> &ProcessedPage {
        let mut current = self;
        while let Some(next) = current.client_redirect.as_deref() {
            current = next;
        }
        current
    }

    fn last_page_mut(&mut self) -> &mut ProcessedPage {
        match self.client_redirect {
            Some(ref mut next) => next.last_page_mut(),
            None => self,
        }
    }

    /// Number of hops in the chain.
    pub fn len(&self) -> usize {
        let mut count = 1;
        let mut current = self;
        while let Some(next) = current.client_redirect.as_deref() {
            count += 1;
            current = next;
        }
        count
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Actual URLs of all hops, head first.
    pub fn urls(&self) -> Vec<&str> {
        let mut urls = vec![self.actual_url.as_str()];
        let mut current = self;
        while let Some(next) = current.client_redirect.as_deref() {
            urls.push(next.actual_url.as_str());
            current = next;
        }
        urls
    }

    /// Replaces the terminus with `chain`.
    pub fn stitch(&mut self, chain: ProcessedPage) {
        *self.last_page_mut() = chain;
    }

    /// Appends `page` as a client side redirect of the terminus.
    pub fn set_client_redirect(&mut self, page: Page) {
        self.last_page_mut().client_redirect = Some(Box::new(ProcessedPage::new(page)));
    }

    /// Drops the response content of this hop.
    pub fn clean_page(&mut self) {
        self.response = None;
    }
}

type ChainMap = BTreeMap<PageId, ProcessedPage>;

/// Chains for top level and frame windows, keyed by the page that currently
/// terminates each chain.
#[derive(Debug, Default)]
pub struct PageChainTracker {
    top: ChainMap,
    frames: ChainMap,
}

impl PageChainTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn map_mut(&mut self, is_frame: bool) -> &mut ChainMap {
        if is_frame { &mut self.frames } else { &mut self.top }
    }

    fn map(&self, is_frame: bool) -> &ChainMap {
        if is_frame { &self.frames } else { &self.top }
    }

    /// Key of the first chain whose head is `page`.
    fn key_of_chain_headed_by(map: &ChainMap, page: PageId) -> Option<PageId> {
        map.iter()
            .find(|(_, chain)| chain.page_id() == page)
            .map(|(key, _)| *key)
    }

    pub fn on_content_changed(&mut self, event: &WindowEvent) {
        let Some(new) = event.new_page.as_ref() else {
            return;
        };
        let map = self.map_mut(event.is_frame);

        match event.old_page.as_ref() {
            Some(old) if old.url == new.url => Self::reload(map, old, new),
            old => {
                // A frame's first load (no previous page) isn't a navigation.
                if event.is_frame && old.is_none() {
                    return;
                }
                let is_root = match old {
                    None => true,
                    Some(old) => old.is_server_redirect() || (event.is_frame && old.is_about_blank()),
                };
                Self::navigate(map, old, new, is_root);
            }
        }
    }

    fn navigate(map: &mut ChainMap, old: Option<&Page>, new: &Page, is_root: bool) {
        let head_key = Self::key_of_chain_headed_by(map, new.id);

        match (head_key, old) {
            (Some(_), _) if is_root => debug!("Chain root reached: {}", new.url),
            (Some(key), Some(old)) => {
                if let Some(existing) = map.remove(&key) {
                    debug!("Prepending {} to chain of {}", old.url, new.url);
                    map.insert(key, ProcessedPage::with_client_redirect(old.clone(), existing));
                }
            }
            (None, _) if is_root => {
                debug!("New chain root: {}", new.url);
                map.insert(new.id, ProcessedPage::new(new.clone()));
            }
            (None, Some(old)) => match map.remove(&old.id) {
                Some(mut chain) => {
                    debug!("Client redirect {} -> {}", old.url, new.url);
                    chain.set_client_redirect(new.clone());
                    map.insert(new.id, chain);
                }
                None => {
                    debug!("New two-hop chain {} -> {}", old.url, new.url);
                    map.insert(
                        new.id,
                        ProcessedPage::with_client_redirect(old.clone(), ProcessedPage::new(new.clone())),
                    );
                }
            },
            (_, None) => {}
        }
    }

    fn reload(map: &mut ChainMap, old: &Page, new: &Page) {
        let Some(mut chain) = map.remove(&old.id) else {
            return;
        };

        if let Some(key) = Self::key_of_chain_headed_by(map, new.id) {
            if old.kind == PageKind::Text {
                warn!("Chain was cut: {} redirects to itself", old.url);
                return;
            }
            if let Some(existing) = map.remove(&key) {
                chain.stitch(existing);
                map.insert(key, chain);
            }
            return;
        }

        chain.stitch(ProcessedPage::new(new.clone()));
        map.insert(new.id, chain);
    }

    pub fn on_window_closed(&mut self, event: &WindowEvent) {
        let Some(old) = event.old_page.as_ref() else {
            return;
        };
        if old.is_about_blank() {
            return;
        }
        let map = self.map_mut(event.is_frame);
        if !map.contains_key(&old.id) {
            debug!("Window closed with untracked page: {}", old.url);
            map.insert(old.id, ProcessedPage::new(old.clone()));
        }
    }

    pub fn lookup_chain(&self, page: &Page, is_frame: bool) -> Result<&ProcessedPage, ChainError> {
        self.map(is_frame)
            .get(&page.id)
            .ok_or_else(|| ChainError::Broken { url: page.url.clone() })
    }

    pub fn frame_chain(&self, page: PageId) -> Option<&ProcessedPage> {
        self.frames.get(&page)
    }

    pub fn chain_count(&self, is_frame: bool) -> usize {
        self.map(is_frame).len()
    }
}

/// Tracker shared between the engine's event callbacks and the worker.
#[derive(Debug, Clone, Default)]
pub struct SharedPageChains {
    inner: Arc<Mutex<PageChainTracker>>,
}

impl SharedPageChains {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, PageChainTracker> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn lookup_chain(&self, page: &Page, is_frame: bool) -> Result<ProcessedPage, ChainError> {
        self.lock().lookup_chain(page, is_frame).cloned()
    }

    pub fn frame_chain(&self, page: PageId) -> Option<ProcessedPage> {
        self.lock().frame_chain(page).cloned()
    }

    pub fn chain_count(&self, is_frame: bool) -> usize {
        self.lock().chain_count(is_frame)
    }
}

impl WindowListener for SharedPageChains {
    fn window_opened(&self, event: &WindowEvent) {
        debug!("Window opened: {:?}", event.window);
    }

    fn content_changed(&self, event: &WindowEvent) {
        self.lock().on_content_changed(event);
    }

    fn window_closed(&self, event: &WindowEvent) {
        self.lock().on_window_closed(event);
    }
}
