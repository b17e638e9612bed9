// Per-task tree of crawl objects
//
// Nodes live in an arena addressed by `NodeId`; the worker moves an explicit
// cursor up and down while it descends into frames and redirects.

use crate::error::{LimitExceeded, StoreError};
use crate::input::NodeInput;
use crate::links::{EmbeddedResource, LinkType, PageLinks};
use crate::object::{AttributeValue, NewObject, NewObjectCounter, ObjectData, ObjectType, Origin};
use crate::params::CrawlParams;
use crate::scripts::{ScriptElement, ScriptsByOrigin};
use crate::store::{DataStoreHelper, FailedRequestRecord, FileRecord, JsContextRecord, ObjectStore, RequestRecord};
use std::collections::HashMap;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub const ROOT: NodeId = NodeId(0);

    pub fn index(&self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone)]
pub struct CrawlObject {
    id: NodeId,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    depth: usize,
    store_id: Option<u64>,
    attributes: ObjectData,
    input: Option<NodeInput>,
    page_links: Option<PageLinks>,
    scripts: Vec<ScriptElement>,
}

impl CrawlObject {
    fn new(id: NodeId, parent: Option<NodeId>, depth: usize) -> Self {
        Self {
            id,
            parent,
            children: Vec::new(),
            depth,
            store_id: None,
            attributes: ObjectData::new(),
            input: None,
            page_links: None,
            scripts: Vec::new(),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn store_id(&self) -> Option<u64> {
        self.store_id
    }

    pub fn attributes(&self) -> &ObjectData {
        &self.attributes
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(name)
    }

    pub fn input(&self) -> Option<&NodeInput> {
        self.input.as_ref()
    }

    pub fn page_links(&self) -> Option<&PageLinks> {
        self.page_links.as_ref()
    }

    pub fn scripts(&self) -> &[ScriptElement] {
        &self.scripts
    }

    fn is_pristine(&self) -> bool {
        self.attributes.is_empty()
            && self.input.is_none()
            && self.children.is_empty()
            && self.page_links.is_none()
            && self.scripts.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushSummary {
    pub root_id: Option<u64>,
    pub nodes: usize,
    pub new_objects: usize,
}

#[derive(Debug, Clone)]
pub struct CrawlTree {
    nodes: Vec<CrawlObject>,
    current: NodeId,
    task_input: NodeInput,
    params: CrawlParams,
    counter: NewObjectCounter,
    new_objects: Vec<(NodeId, NewObject)>,
    url_index: HashMap<String, NodeId>,
    cookies_reference_id: Option<u64>,
    warnings: Vec<String>,
}

impl CrawlTree {
    pub fn new(task_input: NodeInput, params: &CrawlParams) -> Self {
        let mut root = CrawlObject::new(NodeId::ROOT, None, 0);
        root.store_id = task_input.object_id;
        Self {
            nodes: vec![root],
            current: NodeId::ROOT,
            task_input,
            params: params.clone(),
            counter: NewObjectCounter::new(params.link_limit),
            new_objects: Vec::new(),
            url_index: HashMap::new(),
            cookies_reference_id: None,
            warnings: Vec::new(),
        }
    }

    pub fn current(&self) -> NodeId {
        self.current
    }

    pub fn node(&self, id: NodeId) -> &CrawlObject {
        &self.nodes[id.0]
    }

    pub fn nodes(&self) -> &[CrawlObject] {
        &self.nodes
    }

    pub fn root(&self) -> &CrawlObject {
        &self.nodes[0]
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn height(&self) -> usize {
        self.nodes.iter().map(|n| n.depth + 1).max().unwrap_or(1)
    }

    /// Height of the current node's position (the root is at height 1).
    pub fn current_height(&self) -> usize {
        self.nodes[self.current.0].depth + 1
    }

    pub fn task_input(&self) -> &NodeInput {
        &self.task_input
    }

    pub fn params(&self) -> &CrawlParams {
        &self.params
    }

    /// Opens a child of the current node and makes it current.
    pub fn open_sub_context(&mut self) -> Result<NodeId, LimitExceeded> {
        let parent = self.current;
        let depth = self.nodes[parent.0].depth + 1;

        let height_limit = self.params.tree_height_limit();
        if depth + 1 > height_limit {
            debug!("Tree height limit ({}) reached", height_limit);
            return Err(LimitExceeded::Height { limit: height_limit });
        }
        let size_limit = self.params.tree_size_limit();
        if self.nodes.len() + 1 > size_limit {
            debug!("Tree size limit ({}) reached", size_limit);
            return Err(LimitExceeded::Size { limit: size_limit });
        }

        let id = NodeId(self.nodes.len());
        self.nodes.push(CrawlObject::new(id, Some(parent), depth));
        self.nodes[parent.0].children.push(id);
        self.current = id;
        Ok(id)
    }

    /// Makes the parent current again. A child that was never touched is discarded.
    pub fn close_sub_context(&mut self) {
        let id = self.current;
        let Some(parent) = self.nodes[id.0].parent else {
            warn!("Attempt to close the root context");
            return;
        };

        let untouched = self.nodes[id.0].is_pristine()
            && id.0 + 1 == self.nodes.len()
            && self.new_objects.iter().all(|(owner, _)| *owner != id);
        if untouched {
            self.nodes.pop();
            self.nodes[parent.0].children.retain(|child| *child != id);
        }
        self.current = parent;
    }

    pub fn return_to_root(&mut self) {
        self.current = NodeId::ROOT;
    }

    pub fn add_attribute(&mut self, name: &str, value: impl Into<AttributeValue>) {
        self.nodes[self.current.0]
            .attributes
            .insert(name.to_string(), value.into());
    }

    pub fn add_time_attribute(&mut self, name: &str, millis: i64) {
        self.add_attribute(name, AttributeValue::Time(millis));
    }

    pub fn add_reference(&mut self, name: &str, id: u64) {
        self.add_attribute(name, AttributeValue::Ref(id));
    }

    /// Queues a new object found under the current node, while the shared
    /// new-object budget lasts.
    pub fn add_new_object(&mut self, object: NewObject) -> bool {
        if !self.counter.count_down() {
            debug!("New object limit reached, dropping {}", object.url);
            return false;
        }
        self.new_objects.push((self.current, object));
        true
    }

    pub fn new_objects(&self) -> impl Iterator<Item = &NewObject> {
        self.new_objects.iter().map(|(_, object)| object)
    }

    pub fn web_context_init(&mut self, url: &str, referrer: Option<String>, referrer_cookie: Option<u64>) {
        let input = self.task_input.copy_for_sub_context(url, referrer, referrer_cookie);
        let current = self.current;
        self.url_index.insert(url.to_string(), current);
        self.url_index
            .insert(input.url_for_processing().to_string(), current);
        self.nodes[current.0].input = Some(input);
    }

    pub fn current_input(&self) -> Option<&NodeInput> {
        self.nodes[self.current.0].input.as_ref()
    }

    pub fn context_by_url(&self, url: &str) -> Option<NodeId> {
        self.url_index.get(url).copied()
    }

    /// Links of the current node, created on first use with the node's URL as base.
    pub fn page_links(&mut self) -> &mut PageLinks {
        let node = &mut self.nodes[self.current.0];
        let base = node
            .input
            .as_ref()
            .unwrap_or(&self.task_input)
            .url_for_processing()
            .to_string();
        let params = &self.params;
        node.page_links
            .get_or_insert_with(|| PageLinks::new(base, params))
    }

    pub fn add_outgoing_link(&mut self, origin: Origin, value: &str) -> bool {
        self.page_links();
        let node = &mut self.nodes[self.current.0];
        match node.page_links.as_mut() {
            Some(links) => links.add_outgoing(origin, value, &mut self.counter),
            None => false,
        }
    }

    pub fn cookies_reference_id(&self) -> Option<u64> {
        self.cookies_reference_id
    }

    pub fn set_cookies_reference_id(&mut self, id: u64) {
        self.cookies_reference_id = Some(id);
    }

    pub fn add_warning(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Hands captured scripts to the nodes whose URL they ran on; the rest go to the root.
    pub fn attach_scripts(&mut self, scripts: ScriptsByOrigin) {
        for (origin, by_name) in scripts {
            let target = self.context_by_url(&origin).unwrap_or(NodeId::ROOT);
            let mut elements: Vec<ScriptElement> = by_name.into_values().collect();
            elements.sort_by_key(|s| s.id);
            self.nodes[target.0].scripts.extend(elements);
        }
    }

    /// Persists the tree: every node after its children, then the new-object
    /// batch. Links and scripts are released whether or not this succeeds.
    pub fn flush(&mut self, store: &dyn ObjectStore, job: u64) -> Result<FlushSummary, StoreError> {
        let result = self.flush_node(store, job, NodeId::ROOT);
        self.release_transients();
        result?;

        let new_objects = self.submit_new_objects(store, job)?;
        Ok(FlushSummary {
            root_id: self.nodes[0].store_id,
            nodes: self.nodes.len(),
            new_objects,
        })
    }

    fn flush_node(&mut self, store: &dyn ObjectStore, job: u64, id: NodeId) -> Result<(), StoreError> {
        let parent_store_id = self.nodes[id.0]
            .parent
            .and_then(|parent| self.nodes[parent.0].store_id);
        let node = &mut self.nodes[id.0];
        if let Some(parent_store_id) = parent_store_id {
            node.attributes
                .insert("parent".to_string(), AttributeValue::Object(parent_store_id));
        }
        if node.store_id.is_none() {
            node.store_id = Some(store.create_object(job, &node.attributes)?);
        }

        let children = node.children.clone();
        for child in children {
            self.flush_node(store, job, child)?;
        }

        self.prepare_for_save(store, job, id)?;
        if id == NodeId::ROOT && !self.warnings.is_empty() {
            let warning = self.warnings.join("\n");
            self.nodes[0]
                .attributes
                .insert("warning".to_string(), warning.into());
        }

        let node = &self.nodes[id.0];
        if let Some(store_id) = node.store_id {
            debug!("Saving object {} ({} attributes)", store_id, node.attributes.len());
            store.update_object(job, store_id, &node.attributes)?;
        }
        Ok(())
    }

    fn prepare_for_save(&mut self, store: &dyn ObjectStore, job: u64, id: NodeId) -> Result<(), StoreError> {
        let node = &mut self.nodes[id.0];
        let links = node.page_links.take();
        let scripts = std::mem::take(&mut node.scripts);
        let input = node.input.clone();

        let helper = DataStoreHelper::new(store, job);
        let mut attributes = ObjectData::new();
        let mut discovered = Vec::new();

        if let Some(links) = links {
            self.save_links(&helper, &links, input.as_ref(), &mut attributes, &mut discovered)?;
        }

        if self.params.save_js_context && !scripts.is_empty() {
            let contexts: Vec<JsContextRecord> = scripts
                .into_iter()
                .map(|s| JsContextRecord {
                    id: s.id,
                    source: s.source,
                    eval: s.is_eval,
                })
                .collect();
            let list = helper.save_js_contexts(&contexts)?;
            attributes.insert("js_context_list".to_string(), AttributeValue::Ref(list));
        }

        self.nodes[id.0].attributes.extend(attributes);
        self.new_objects
            .extend(discovered.into_iter().map(|object| (id, object)));
        Ok(())
    }

    fn save_links(
        &self,
        helper: &DataStoreHelper<'_>,
        links: &PageLinks,
        input: Option<&NodeInput>,
        attributes: &mut ObjectData,
        discovered: &mut Vec<NewObject>,
    ) -> Result<(), StoreError> {
        let link_referrer = input
            .filter(|_| self.params.add_referrer)
            .map(|i| i.url_for_processing().to_string());
        let link_cookie = self
            .cookies_reference_id
            .filter(|_| self.params.add_referrer_cookie);
        for link in links.outgoing() {
            discovered.push(
                NewObject::new(&link.url, Some(link.origin), ObjectType::Url)
                    .with_referrer(link_referrer.clone())
                    .with_referrer_cookie(link_cookie),
            );
        }

        let embedded_referrer = input
            .filter(|_| self.params.add_referrer)
            .and_then(|i| i.referrer.clone());
        let embedded_cookie = input
            .filter(|_| self.params.add_referrer_cookie)
            .and_then(|i| i.referrer_cookie_id);

        let mut failed = Vec::new();
        for link_type in LinkType::ALL {
            let mut files = Vec::new();
            for resource in links.group(link_type) {
                let request = request_record(resource);
                match resource.content() {
                    Some(content) if !resource.is_failed() && resource.status() == Some(200) => {
                        let content_id = helper.save_content(content)?;
                        files.push(FileRecord {
                            requests: vec![request],
                            content_type: resource.content_type().to_string(),
                            content: content_id,
                        });
                        if is_document_type(resource.content_type()) {
                            discovered.push(
                                NewObject::new(resource.absolute_url(), Some(Origin::Embedded), ObjectType::File)
                                    .with_mime_type(resource.content_type())
                                    .with_referrer(embedded_referrer.clone())
                                    .with_referrer_cookie(embedded_cookie)
                                    .with_content(content_id),
                            );
                        }
                    }
                    _ => failed.push(FailedRequestRecord {
                        requests: vec![request],
                        reason: resource
                            .failure()
                            .filter(|r| !r.is_empty())
                            .unwrap_or("Resource not retrieved")
                            .to_string(),
                    }),
                }
            }
            if !files.is_empty() {
                let list = helper.save_files(&files)?;
                attributes.insert(link_type.list_attribute().to_string(), AttributeValue::Ref(list));
            }
        }

        for resource in links.resources().filter(|r| r.is_server_redirect()) {
            discovered.push(
                NewObject::new(resource.url_before_redirect(), Some(Origin::ServerRedirect), ObjectType::Url)
                    .with_referrer(link_referrer.clone())
                    .with_referrer_cookie(link_cookie),
            );
        }

        if self.params.save_failed && !failed.is_empty() {
            let list = helper.save_failed_requests(&failed)?;
            attributes.insert("failed_list".to_string(), AttributeValue::Ref(list));
        }
        Ok(())
    }

    fn submit_new_objects(&mut self, store: &dyn ObjectStore, job: u64) -> Result<usize, StoreError> {
        let pending = std::mem::take(&mut self.new_objects);
        if pending.is_empty() {
            return Ok(0);
        }
        let batch: Vec<ObjectData> = pending
            .iter()
            .map(|(owner, object)| object.to_object_data(self.nodes[owner.0].store_id))
            .collect();
        debug!("Submitting {} new objects", batch.len());
        Ok(store.save_new_objects(job, &batch)?.len())
    }

    fn release_transients(&mut self) {
        for node in &mut self.nodes {
            if let Some(mut links) = node.page_links.take() {
                links.release();
            }
            node.scripts.clear();
        }
    }
}

fn request_record(resource: &EmbeddedResource) -> RequestRecord {
    let url = resource.absolute_url();
    let record = RequestRecord::new(url, url);
    match resource.response() {
        Some(response) => record
            .with_request_header(response.request_headers_text())
            .with_response(response.status, response.response_headers_text()),
        None => record,
    }
}

/// Content worth handing on for separate analysis (documents, applets, flash).
fn is_document_type(content_type: &str) -> bool {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_lowercase();
    mime.starts_with("application/")
        && !mime.contains("javascript")
        && !mime.contains("json")
        && !mime.ends_with("xml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::WebResponse;
    use crate::store::MemoryStore;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn tree_with(params: CrawlParams) -> CrawlTree {
        let mut tree = CrawlTree::new(NodeInput::new("http://example.com"), &params);
        tree.web_context_init("http://example.com/", None, None);
        tree
    }

    struct FailingStore;

    impl ObjectStore for FailingStore {
        fn save_blob(&self, _job: u64, _data: &[u8]) -> Result<u64, StoreError> {
            Err(StoreError::Backend("disk full".into()))
        }
        fn load_blob(&self, _job: u64, id: u64) -> Result<Vec<u8>, StoreError> {
            Err(StoreError::NotFound(id))
        }
        fn create_object(&self, _job: u64, _data: &ObjectData) -> Result<u64, StoreError> {
            Ok(1)
        }
        fn update_object(&self, _job: u64, _id: u64, _data: &ObjectData) -> Result<(), StoreError> {
            Ok(())
        }
        fn save_new_objects(&self, _job: u64, objects: &[ObjectData]) -> Result<Vec<u64>, StoreError> {
            Ok(vec![0; objects.len()])
        }
    }

    #[test]
    fn test_height_limit() {
        let mut tree = tree_with(CrawlParams {
            redirect_depth_limit: 1,
            ..CrawlParams::default()
        });
        tree.open_sub_context().unwrap();
        tree.add_attribute("type", "url");
        assert_eq!(
            tree.open_sub_context(),
            Err(LimitExceeded::Height { limit: 2 })
        );
        assert_eq!(tree.height(), 2);
    }

    #[test]
    fn test_depth_limit_zero_allows_no_children() {
        let mut tree = tree_with(CrawlParams {
            redirect_depth_limit: 0,
            ..CrawlParams::default()
        });
        assert!(matches!(tree.open_sub_context(), Err(LimitExceeded::Height { .. })));
        assert_eq!(tree.current(), NodeId::ROOT);
        assert_eq!(tree.node_count(), 1);
    }

    #[test]
    fn test_size_limit() {
        let mut tree = tree_with(CrawlParams {
            redirect_total_limit: 2,
            ..CrawlParams::default()
        });
        for _ in 0..2 {
            tree.open_sub_context().unwrap();
            tree.add_attribute("type", "url");
            tree.close_sub_context();
        }
        assert_eq!(tree.open_sub_context(), Err(LimitExceeded::Size { limit: 3 }));
        assert_eq!(tree.node_count(), 3);
    }

    #[test]
    fn test_open_close_untouched_is_noop() {
        let mut tree = tree_with(CrawlParams::default());
        let before = tree.node_count();
        tree.open_sub_context().unwrap();
        tree.close_sub_context();
        assert_eq!(tree.node_count(), before);
        assert!(tree.root().children().is_empty());

        tree.open_sub_context().unwrap();
        tree.add_attribute("origin", "frame");
        tree.close_sub_context();
        assert_eq!(tree.node_count(), before + 1);
        assert_eq!(tree.current(), NodeId::ROOT);
    }

    #[test]
    fn test_close_at_root_stays_at_root() {
        let mut tree = tree_with(CrawlParams::default());
        tree.close_sub_context();
        assert_eq!(tree.current(), NodeId::ROOT);
    }

    #[test]
    fn test_new_object_budget_shared_with_links() {
        let mut tree = tree_with(CrawlParams {
            link_limit: 2,
            ..CrawlParams::default()
        });
        assert!(tree.add_outgoing_link(Origin::Link, "/a"));
        assert!(tree.add_new_object(NewObject::new("http://example.com/f", None, ObjectType::File)));
        assert!(!tree.add_new_object(NewObject::new("http://example.com/g", None, ObjectType::File)));
        assert!(!tree.add_outgoing_link(Origin::Link, "/b"));
        assert_eq!(tree.new_objects().count(), 1);
    }

    #[test]
    fn test_flush_persists_children_with_parent_reference() {
        let store = MemoryStore::new();
        let mut tree = tree_with(CrawlParams::default());
        tree.add_attribute("active", true);
        tree.open_sub_context().unwrap();
        tree.add_attribute("origin", "frame");
        tree.close_sub_context();

        let summary = tree.flush(&store, 1).unwrap();
        assert_eq!(summary.nodes, 2);

        let objects = store.objects(1);
        assert_eq!(objects.len(), 2);
        let root_id = summary.root_id.unwrap();
        let (_, child) = objects.iter().find(|(id, _)| *id != root_id).unwrap();
        assert_eq!(child["parent"], AttributeValue::Object(root_id));
        assert_eq!(child["origin"], AttributeValue::Str("frame".into()));
    }

    #[test]
    fn test_flush_turns_links_into_new_objects() {
        let store = MemoryStore::new();
        let mut tree = tree_with(CrawlParams::default());
        tree.add_outgoing_link(Origin::Link, "/one");
        tree.add_outgoing_link(Origin::Longdesc, "/two");

        let summary = tree.flush(&store, 3).unwrap();
        assert_eq!(summary.new_objects, 2);

        let new_objects = store.new_objects(3);
        assert_eq!(new_objects[0].1["url_original"], AttributeValue::Str("http://example.com/one".into()));
        assert_eq!(new_objects[0].1["origin"], AttributeValue::Str("link".into()));
        assert_eq!(new_objects[0].1["referrer"], AttributeValue::Str("http://example.com/".into()));
        assert_eq!(new_objects[1].1["origin"], AttributeValue::Str("longdesc".into()));
        assert_eq!(
            new_objects[0].1["parent"],
            AttributeValue::Object(summary.root_id.unwrap())
        );
    }

    #[test]
    fn test_flush_files_embedded_resources() {
        let store = MemoryStore::new();
        let mut tree = tree_with(CrawlParams {
            save_images: true,
            save_objects: true,
            ..CrawlParams::default()
        });
        tree.page_links().add_embedded(LinkType::Image, "ok.png");
        tree.page_links().add_embedded(LinkType::Image, "missing.png");
        tree.page_links().add_object("doc.pdf", None, None);
        for resource in tree.page_links().resources_mut() {
            if resource.absolute_url().ends_with("missing.png") {
                resource.mark_failed("Unknown host: example.com".into());
            } else {
                let content_type = if resource.absolute_url().ends_with(".pdf") {
                    "application/pdf"
                } else {
                    "image/png"
                };
                let url = resource.absolute_url().to_string();
                resource.update(
                    Arc::new(WebResponse {
                        status: 200,
                        content_type: content_type.into(),
                        request_url: url,
                        body: b"bytes".to_vec(),
                        ..Default::default()
                    }),
                    None,
                );
            }
        }

        let summary = tree.flush(&store, 1).unwrap();
        let root = store.object(summary.root_id.unwrap()).unwrap();
        assert!(root.contains_key("image_list"));
        assert!(root.contains_key("object_list"));
        assert!(root.contains_key("failed_list"));

        let helper = DataStoreHelper::new(&store, 1);
        let failed = helper
            .load_failed_requests(root["failed_list"].as_ref_id().unwrap())
            .unwrap();
        assert_eq!(failed.len(), 1);
        assert!(failed[0].reason.starts_with("Unknown host"));

        // Only the PDF is handed on as a new object.
        let new_objects = store.new_objects(1);
        assert_eq!(new_objects.len(), 1);
        assert_eq!(new_objects[0].1["mime_type"], AttributeValue::Str("application/pdf".into()));
        assert_eq!(new_objects[0].1["origin"], AttributeValue::Str("embedded".into()));
    }

    #[test]
    fn test_scripts_attach_by_origin() {
        let store = MemoryStore::new();
        let mut tree = tree_with(CrawlParams::default());
        tree.open_sub_context().unwrap();
        tree.web_context_init("http://example.com/frame", None, None);
        let frame = tree.current();
        tree.close_sub_context();

        let mut scripts = ScriptsByOrigin::new();
        let script = |id| ScriptElement {
            id,
            source: "x()".into(),
            is_eval: false,
        };
        scripts.insert(
            "http://example.com/frame".into(),
            BTreeMap::from([("a.js".to_string(), script(1))]),
        );
        scripts.insert(
            "http://elsewhere.example/".into(),
            BTreeMap::from([("b.js".to_string(), script(2)), ("c.js".to_string(), script(3))]),
        );
        tree.attach_scripts(scripts);

        assert_eq!(tree.node(frame).scripts().len(), 1);
        assert_eq!(tree.root().scripts().len(), 2);

        let summary = tree.flush(&store, 1).unwrap();
        let root = store.object(summary.root_id.unwrap()).unwrap();
        let helper = DataStoreHelper::new(&store, 1);
        let contexts = helper
            .load_js_contexts(root["js_context_list"].as_ref_id().unwrap())
            .unwrap();
        assert_eq!(contexts.iter().map(|c| c.id).collect::<Vec<_>>(), vec![2, 3]);
        assert!(tree.root().scripts().is_empty());
    }

    #[test]
    fn test_flush_failure_still_releases_transients() {
        let mut tree = tree_with(CrawlParams::default());
        tree.page_links();
        tree.attach_scripts(ScriptsByOrigin::from([(
            "http://example.com/".to_string(),
            BTreeMap::from([(
                "a.js".to_string(),
                ScriptElement {
                    id: 1,
                    source: "x".into(),
                    is_eval: false,
                },
            )]),
        )]));

        assert!(tree.flush(&FailingStore, 1).is_err());
        assert!(tree.root().page_links().is_none());
        assert!(tree.root().scripts().is_empty());
    }

    #[test]
    fn test_root_uses_input_object_id() {
        let store = MemoryStore::new();
        let input = NodeInput::new("http://example.com/").with_object_id(42);
        let mut tree = CrawlTree::new(input, &CrawlParams::default());
        tree.add_attribute("active", false);
        tree.add_warning("first");
        tree.add_warning("second");

        let summary = tree.flush(&store, 1).unwrap();
        assert_eq!(summary.root_id, Some(42));
        let root = store.object(42).unwrap();
        assert_eq!(root["warning"], AttributeValue::Str("first\nsecond".into()));
    }
}
