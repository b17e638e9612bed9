// Links and embedded resources collected while inspecting a page

use crate::engine::WebResponse;
use crate::object::{NewObjectCounter, Origin};
use crate::params::CrawlParams;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LinkType {
    Object,
    Multimedia,
    Image,
    Other,
}

impl LinkType {
    pub const ALL: [LinkType; 4] = [
        LinkType::Image,
        LinkType::Object,
        LinkType::Multimedia,
        LinkType::Other,
    ];

    /// Attribute under which the saved group is referenced.
    pub fn list_attribute(&self) -> &'static str {
        match self {
            LinkType::Object => "object_list",
            LinkType::Multimedia => "multimedia_list",
            LinkType::Image => "image_list",
            LinkType::Other => "other_list",
        }
    }

    fn enabled(&self, params: &CrawlParams) -> bool {
        match self {
            LinkType::Object => params.save_objects,
            LinkType::Multimedia => params.save_multimedia,
            LinkType::Image => params.save_images,
            LinkType::Other => params.save_others,
        }
    }
}

/// Trims and percent-encodes ordinary and non-breaking spaces.
pub fn format_url(raw: &str) -> String {
    raw.trim().replace([' ', '\u{a0}'], "%20")
}

fn is_iis_encoded(url: &str) -> bool {
    url.match_indices("%u").any(|(i, _)| {
        url.get(i + 2..i + 6)
            .is_some_and(|hex| hex.chars().all(|c| c.is_ascii_hexdigit()))
    })
}

/// Resolves `relative` against `base`. An IIS style `%uXXXX` tail is kept
/// verbatim after the resolved prefix.
pub fn resolve(base: &str, relative: &str) -> Option<String> {
    let base = Url::parse(&format_url(base)).ok()?;

    if is_iis_encoded(relative)
        && let Some(i) = relative.find("%u")
    {
        let (head, tail) = relative.split_at(i);
        let head = format_url(head);
        let head = if head.is_empty() { "/".to_string() } else { head };
        let joined = base.join(&head).ok()?;
        return Some(format!("{}{}", joined, format_url(tail)));
    }

    base.join(&format_url(relative)).ok().map(|u| u.to_string())
}

/// True when the value parses as an absolute URL.
pub fn is_proper_url(value: &str) -> bool {
    Url::parse(value.trim()).is_ok()
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutgoingLink {
    pub url: String,
    pub origin: Origin,
}

/// An embedded resource together with the outcome of fetching it.
#[derive(Debug, Clone)]
pub struct EmbeddedResource {
    link_type: LinkType,
    url: String,
    resolved_url: Option<String>,
    response: Option<Arc<WebResponse>>,
    failure: Option<String>,
    failed: bool,
}

impl EmbeddedResource {
    pub fn new(base: &str, relative: &str, link_type: LinkType) -> Option<Self> {
        let url = resolve(base, relative)?;
        Some(Self {
            link_type,
            url,
            resolved_url: None,
            response: None,
            failure: None,
            failed: false,
        })
    }

    pub fn link_type(&self) -> LinkType {
        self.link_type
    }

    /// Final URL after any redirects, or the original absolute URL.
    pub fn absolute_url(&self) -> &str {
        self.resolved_url.as_deref().unwrap_or(&self.url)
    }

    pub fn url_before_redirect(&self) -> &str {
        &self.url
    }

    pub fn is_server_redirect(&self) -> bool {
        self.resolved_url
            .as_deref()
            .is_some_and(|resolved| resolved != self.url)
    }

    pub fn update(&mut self, response: Arc<WebResponse>, failure: Option<String>) {
        self.resolved_url = Some(response.request_url.clone()).filter(|u| !u.is_empty());
        self.response = Some(response);
        self.failure = failure;
        self.failed = false;
    }

    pub fn mark_failed(&mut self, reason: String) {
        self.failure = Some(reason);
        self.failed = true;
    }

    pub fn is_failed(&self) -> bool {
        self.failed
    }

    pub fn is_resolved(&self) -> bool {
        self.failed || self.response.is_some()
    }

    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    pub fn status(&self) -> Option<u16> {
        self.response.as_ref().map(|r| r.status)
    }

    pub fn content_type(&self) -> &str {
        self.response
            .as_ref()
            .map(|r| r.content_type.as_str())
            .unwrap_or("")
    }

    pub fn response(&self) -> Option<&WebResponse> {
        self.response.as_deref()
    }

    pub fn content(&self) -> Option<&[u8]> {
        self.response.as_ref().map(|r| r.body.as_slice())
    }

    pub fn release(&mut self) {
        self.response = None;
    }
}

/// Per-page link collection: base URL handling, embedded resources grouped by
/// type, and outgoing links.
#[derive(Debug, Clone)]
pub struct PageLinks {
    base_url: String,
    base_tag_ignored: bool,
    groups: BTreeMap<LinkType, Vec<EmbeddedResource>>,
    outgoing: Vec<OutgoingLink>,
    follow_links: bool,
    link_limit: usize,
}

impl PageLinks {
    pub fn new(base_url: impl Into<String>, params: &CrawlParams) -> Self {
        let groups = LinkType::ALL
            .into_iter()
            .filter(|t| t.enabled(params))
            .map(|t| (t, Vec::new()))
            .collect();
        Self {
            base_url: base_url.into(),
            base_tag_ignored: false,
            groups,
            outgoing: Vec::new(),
            follow_links: params.link_click_policy,
            link_limit: params.link_limit,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn set_base_url(&mut self, base_url: impl Into<String>) {
        self.base_url = base_url.into();
    }

    pub fn ignore_base_tag(&mut self) {
        self.base_tag_ignored = true;
    }

    pub fn is_base_tag_ignored(&self) -> bool {
        self.base_tag_ignored
    }

    pub fn add_embedded(&mut self, link_type: LinkType, value: &str) {
        let base = self.base_url.clone();
        self.add_embedded_with_base(link_type, &base, value, &[]);
    }

    /// Adds an `object`/`applet` resource. `codebase` replaces the base URL and
    /// the space separated `archive` entries are added before the main resource.
    pub fn add_object(&mut self, value: &str, codebase: Option<&str>, archive: Option<&str>) {
        let base = match codebase.map(str::trim).filter(|c| !c.is_empty()) {
            Some(codebase) if codebase.ends_with('/') => codebase.to_string(),
            Some(codebase) => format!("{}/", codebase),
            None => self.base_url.clone(),
        };
        let archives: Vec<&str> = archive
            .map(|a| a.split(' ').filter(|s| !s.is_empty()).collect())
            .unwrap_or_default();
        self.add_embedded_with_base(LinkType::Object, &base, value, &archives);
    }

    fn add_embedded_with_base(&mut self, link_type: LinkType, base: &str, value: &str, archives: &[&str]) {
        let Some(group) = self.groups.get_mut(&link_type) else {
            debug!("Element ({:?}) with value {} will not be processed", link_type, value);
            return;
        };
        if value.trim().is_empty() {
            return;
        }

        for relative in archives.iter().copied().chain(std::iter::once(value)) {
            match EmbeddedResource::new(base, relative, link_type) {
                Some(resource) => {
                    if group.iter().all(|r| r.url != resource.url) {
                        debug!("Adding embedded resource of type {:?}: {}", link_type, resource.url);
                        group.push(resource);
                    }
                }
                None => warn!("Can't process url (base={}, relative={}, origin={:?})", base, relative, link_type),
            }
        }
    }

    /// Records an outgoing link. Accepted links consume the shared new-object budget.
    pub fn add_outgoing(&mut self, origin: Origin, value: &str, counter: &mut NewObjectCounter) -> bool {
        if !self.follow_links || self.outgoing.len() >= self.link_limit {
            return false;
        }
        if value.trim().is_empty() || !counter.count_down() {
            return false;
        }
        match resolve(&self.base_url, value) {
            Some(url) => {
                let link = OutgoingLink { url, origin };
                if !self.outgoing.contains(&link) {
                    self.outgoing.push(link);
                }
                true
            }
            None => {
                warn!("Can't process url (base={}, relative={}, origin={})", self.base_url, value, origin);
                false
            }
        }
    }

    pub fn outgoing(&self) -> &[OutgoingLink] {
        &self.outgoing
    }

    pub fn group(&self, link_type: LinkType) -> &[EmbeddedResource] {
        self.groups.get(&link_type).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn resources_mut(&mut self) -> impl Iterator<Item = &mut EmbeddedResource> {
        self.groups.values_mut().flatten()
    }

    pub fn resources(&self) -> impl Iterator<Item = &EmbeddedResource> {
        self.groups.values().flatten()
    }

    pub fn release(&mut self) {
        debug!("Releasing embedded content");
        for resource in self.resources_mut() {
            resource.release();
        }
    }
}
