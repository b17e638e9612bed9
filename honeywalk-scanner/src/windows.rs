// Window bookkeeping shared by engine implementations
//
// Keeps the page each window shows and fires the window events the chain
// tracker listens to. Listeners are always called without the lock held.

use crate::engine::{ABOUT_BLANK, Page, PageId, PageKind, WebResponse, WindowEvent, WindowId, WindowListener};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

pub const TOP_WINDOW: WindowId = WindowId(0);

#[derive(Debug)]
struct Slot {
    is_frame: bool,
    page: Option<Page>,
}

#[derive(Debug, Default)]
struct State {
    windows: BTreeMap<WindowId, Slot>,
    next_page: u64,
    next_window: u64,
}

#[derive(Default)]
pub struct WindowRegistry {
    state: Mutex<State>,
    listener: Mutex<Option<Arc<dyn WindowListener>>>,
}

impl WindowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn listener(&self) -> Option<Arc<dyn WindowListener>> {
        self.listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_listener(&self, listener: Arc<dyn WindowListener>) {
        *self.listener.lock().unwrap_or_else(PoisonError::into_inner) = Some(listener);
    }

    pub fn is_frame(&self, window: WindowId) -> bool {
        self.lock()
            .windows
            .get(&window)
            .is_some_and(|slot| slot.is_frame)
    }

    pub fn current_page(&self, window: WindowId) -> Option<Page> {
        self.lock()
            .windows
            .get(&window)
            .and_then(|slot| slot.page.clone())
    }

    /// Opens a frame window showing `about:blank`.
    pub fn open_frame(&self) -> WindowId {
        let window = {
            let mut state = self.lock();
            state.next_window += 1;
            let window = WindowId(state.next_window);
            state.windows.insert(window, Slot { is_frame: true, page: None });
            window
        };
        if let Some(listener) = self.listener() {
            listener.window_opened(&WindowEvent {
                window,
                is_frame: true,
                old_page: None,
                new_page: None,
            });
        }
        let blank = WebResponse {
            request_url: ABOUT_BLANK.to_string(),
            ..Default::default()
        };
        self.show(window, ABOUT_BLANK, PageKind::Html, Arc::new(blank));
        window
    }

    /// Puts a new page into `window` (opening it as a top-level window if
    /// unknown) and reports the change.
    pub fn show(&self, window: WindowId, url: &str, kind: PageKind, response: Arc<WebResponse>) -> Page {
        let (event, page) = {
            let mut state = self.lock();
            state.next_page += 1;
            let id = PageId(state.next_page);
            let slot = state
                .windows
                .entry(window)
                .or_insert(Slot { is_frame: false, page: None });
            let page = Page {
                id,
                url: url.to_string(),
                window,
                in_frame: slot.is_frame,
                kind,
                response,
            };
            let old_page = slot.page.replace(page.clone());
            let event = WindowEvent {
                window,
                is_frame: slot.is_frame,
                old_page,
                new_page: Some(page.clone()),
            };
            (event, page)
        };
        debug!("Window {:?} now shows {}", window, page.url);
        if let Some(listener) = self.listener() {
            listener.content_changed(&event);
        }
        page
    }

    /// Closes every window, top-level last.
    pub fn close_all(&self) {
        let windows = std::mem::take(&mut self.lock().windows);
        let Some(listener) = self.listener() else {
            return;
        };
        for (window, slot) in windows.into_iter().rev() {
            listener.window_closed(&WindowEvent {
                window,
                is_frame: slot.is_frame,
                old_page: slot.page,
                new_page: None,
            });
        }
    }

    pub fn window_count(&self) -> usize {
        self.lock().windows.len()
    }
}
