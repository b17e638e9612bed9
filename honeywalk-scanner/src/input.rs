// Per-context input data: the URL being processed and where it came from

use serde::{Deserialize, Serialize};

// Scheme plus host can't put a '/' past this index ("https://" is 8 bytes).
const LAST_SLASH_BOUNDARY: usize = 8;

/// Input metadata attached to a crawl context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInput {
    pub object_id: Option<u64>,
    url_original: String,
    url_for_processing: String,
    pub referrer: Option<String>,
    pub referrer_cookie_id: Option<u64>,
    pub depth: Option<u32>,
    pub top_ancestor: Option<u64>,
    pub proxy: Option<String>,
}

impl NodeInput {
    pub fn new(url_original: impl Into<String>) -> Self {
        let url_original = url_original.into();
        let url_for_processing = url_for_processing(&url_original);
        Self {
            object_id: None,
            url_original,
            url_for_processing,
            referrer: None,
            referrer_cookie_id: None,
            depth: None,
            top_ancestor: None,
            proxy: None,
        }
    }

    pub fn with_object_id(mut self, id: u64) -> Self {
        self.object_id = Some(id);
        self
    }

    pub fn with_referrer(mut self, referrer: impl Into<String>) -> Self {
        self.referrer = Some(referrer.into());
        self
    }

    pub fn with_referrer_cookie(mut self, cookie_id: u64) -> Self {
        self.referrer_cookie_id = Some(cookie_id);
        self
    }

    pub fn with_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    pub fn url_original(&self) -> &str {
        &self.url_original
    }

    pub fn url_for_processing(&self) -> &str {
        &self.url_for_processing
    }

    /// Copy for a nested context: identity, depth, ancestry and proxy carry over,
    /// the URL and its referrer are replaced.
    pub fn copy_for_sub_context(
        &self,
        url_original: &str,
        referrer: Option<String>,
        referrer_cookie_id: Option<u64>,
    ) -> Self {
        let mut copy = Self::new(url_original);
        copy.object_id = self.object_id;
        copy.depth = self.depth;
        copy.top_ancestor = self.top_ancestor;
        copy.proxy = self.proxy.clone();
        copy.referrer = referrer;
        copy.referrer_cookie_id = referrer_cookie_id;
        copy
    }
}

/// Replaces ordinary and non-breaking spaces with `%20` and appends `/` to a
/// bare `http(s)://host`.
pub fn url_for_processing(url_original: &str) -> String {
    let mut url = url_original.replace([' ', '\u{a0}'], "%20");
    if is_hostname_only(&url) {
        url.push('/');
    }
    url
}

fn is_hostname_only(url: &str) -> bool {
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return false;
    }
    let last_slash = url.rfind('/').unwrap_or(0);
    last_slash < LAST_SLASH_BOUNDARY && !url.ends_with('/')
}
