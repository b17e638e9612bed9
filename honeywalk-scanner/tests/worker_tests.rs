// Worker tests: page inspection and embedded resources, driven by the scripted engine

use honeywalk_scanner::engine::DomElement;
use honeywalk_scanner::store::DataStoreHelper;
use honeywalk_scanner::testing::{ScriptedEngine, ScriptedPage};
use honeywalk_scanner::{
    AttributeValue, CrawlParams, CrawlTree, CrawlWorker, MemoryStore, NodeInput, ObjectData, ObjectStore, WorkerState,
};
use std::sync::Arc;
use tokio::runtime::Handle;

const JOB: u64 = 3;
const ROOT: &str = "http://site.test/";

struct Crawled {
    root: ObjectData,
    children: Vec<ObjectData>,
    store: Arc<MemoryStore>,
    engine: Arc<ScriptedEngine>,
}

impl Crawled {
    fn helper(&self) -> DataStoreHelper<'_> {
        DataStoreHelper::new(self.store.as_ref(), JOB)
    }

    /// Requests after the root page itself.
    fn downloads(&self) -> Vec<String> {
        self.engine.requests().into_iter().skip(1).collect()
    }

    fn new_object_urls(&self) -> Vec<String> {
        self.store
            .new_objects(JOB)
            .into_iter()
            .map(|(_, data)| str_attr(&data, "url_original").to_string())
            .collect()
    }
}

/// Runs a worker over `url` the way the follower does, then flushes the tree.
async fn crawl(engine: ScriptedEngine, url: &str, params: CrawlParams) -> Crawled {
    let engine = Arc::new(engine);
    let store = Arc::new(MemoryStore::new());
    let input = NodeInput::new(url);
    let mut tree = CrawlTree::new(input.clone(), &params);
    tree.web_context_init(input.url_original(), None, None);

    let mut worker = CrawlWorker::new(engine.clone(), store.clone(), JOB, params, Handle::current());
    let (mut tree, state) = tokio::task::spawn_blocking(move || {
        let state = worker.run(&mut tree);
        (tree, state)
    })
    .await
    .unwrap();
    assert_eq!(state, WorkerState::Completed);

    let summary = tree.flush(store.as_ref(), JOB).unwrap();
    let root_id = summary.root_id.unwrap();
    let root = store.object(root_id).unwrap();
    let children = store
        .objects(JOB)
        .into_iter()
        .filter(|(id, _)| *id != root_id)
        .map(|(_, data)| data)
        .collect();
    Crawled {
        root,
        children,
        store,
        engine,
    }
}

fn page(elements: Vec<DomElement>) -> ScriptedPage {
    elements
        .into_iter()
        .fold(ScriptedPage::html("<html></html>"), ScriptedPage::with_element)
}

fn str_attr<'a>(data: &'a ObjectData, name: &str) -> &'a str {
    data.get(name).and_then(AttributeValue::as_str).unwrap_or_default()
}

fn list_id(data: &ObjectData, name: &str) -> u64 {
    data.get(name)
        .and_then(AttributeValue::as_ref_id)
        .unwrap_or_else(|| panic!("missing {}", name))
}

// ============================================================================
// Embedded Resources
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn test_embedded_resources_follow_save_flags() {
    let engine = ScriptedEngine::new()
        .with_route(
            ROOT,
            page(vec![
                DomElement::new("img").with_attr("src", "/logo.png"),
                DomElement::new("audio").with_attr("src", "/song.mp3"),
                DomElement::new("object").with_attr("data", "/movie.swf"),
            ]),
        )
        .with_route("http://site.test/logo.png", ScriptedPage::binary("image/png", b"\x89PNG"))
        .with_route("http://site.test/song.mp3", ScriptedPage::binary("audio/mpeg", b"ID3"));
    let params = CrawlParams {
        save_images: true,
        ..CrawlParams::default()
    };

    let crawled = crawl(engine, ROOT, params).await;
    assert_eq!(crawled.downloads(), vec!["http://site.test/logo.png"]);
    assert!(!crawled.root.contains_key("multimedia_list"));
    assert!(!crawled.root.contains_key("object_list"));
    assert!(!crawled.root.contains_key("failed_list"));

    let images = crawled
        .helper()
        .load_files(list_id(&crawled.root, "image_list"))
        .unwrap();
    assert_eq!(images.len(), 1);
    assert_eq!(images[0].content_type, "image/png");
    assert_eq!(images[0].requests[0].request_url_absolute, "http://site.test/logo.png");
    assert_eq!(images[0].requests[0].response_code, Some(200));
    assert_eq!(crawled.store.load_blob(JOB, images[0].content).unwrap(), b"\x89PNG");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unretrieved_resources_go_to_failed_list() {
    let engine = ScriptedEngine::new()
        .with_route(
            ROOT,
            page(vec![
                DomElement::new("img").with_attr("src", "http://gone.test/a.png"),
                DomElement::new("img").with_attr("src", "/b.png"),
            ]),
        )
        .with_route(
            "http://site.test/b.png",
            ScriptedPage::binary("text/html", b"").with_status(404, "Not Found"),
        );
    let params = CrawlParams {
        save_images: true,
        ..CrawlParams::default()
    };

    let crawled = crawl(engine, ROOT, params).await;
    assert!(!crawled.root.contains_key("image_list"));

    let failed = crawled
        .helper()
        .load_failed_requests(list_id(&crawled.root, "failed_list"))
        .unwrap();
    assert_eq!(failed.len(), 2);
    assert_eq!(failed[0].requests[0].request_url_absolute, "http://gone.test/a.png");
    assert!(failed[0].reason.starts_with("Unknown host: gone.test"));
    assert_eq!(failed[0].requests[0].response_code, None);
    assert_eq!(failed[1].reason, "Not Found");
    assert_eq!(failed[1].requests[0].response_code, Some(404));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_failed_list_is_skipped_without_save_failed() {
    let engine = ScriptedEngine::new().with_route(ROOT, page(vec![DomElement::new("img").with_attr("src", "/x.png")]));
    let params = CrawlParams {
        save_images: true,
        save_failed: false,
        ..CrawlParams::default()
    };

    let crawled = crawl(engine, ROOT, params).await;
    assert_eq!(crawled.downloads(), vec!["http://site.test/x.png"]);
    assert!(!crawled.root.contains_key("failed_list"));
}

fn redirecting_image() -> ScriptedEngine {
    ScriptedEngine::new()
        .with_route(ROOT, page(vec![DomElement::new("img").with_attr("src", "/r1")]))
        .with_route("http://site.test/r1", ScriptedPage::redirect(302, "/r2"))
        .with_route("http://site.test/r2", ScriptedPage::redirect(301, "/r3"))
        .with_route("http://site.test/r3", ScriptedPage::binary("image/gif", b"GIF89a"))
}

#[tokio::test(flavor = "multi_thread")]
async fn test_embedded_redirects_are_followed() {
    let params = CrawlParams {
        save_images: true,
        ..CrawlParams::default()
    };

    let crawled = crawl(redirecting_image(), ROOT, params).await;
    assert_eq!(
        crawled.downloads(),
        vec!["http://site.test/r1", "http://site.test/r2", "http://site.test/r3"]
    );

    let images = crawled
        .helper()
        .load_files(list_id(&crawled.root, "image_list"))
        .unwrap();
    assert_eq!(images.len(), 1);
    assert_eq!(images[0].requests[0].request_url_absolute, "http://site.test/r3");

    let redirects: Vec<(String, String)> = crawled
        .store
        .new_objects(JOB)
        .into_iter()
        .map(|(_, data)| (str_attr(&data, "url_original").to_string(), str_attr(&data, "origin").to_string()))
        .collect();
    assert_eq!(redirects, vec![("http://site.test/r1".to_string(), "redirect".to_string())]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_embedded_redirects_stop_at_tree_height() {
    // Root at height 1, so a height limit of 2 allows one extra hop
    let params = CrawlParams {
        save_images: true,
        redirect_depth_limit: 1,
        ..CrawlParams::default()
    };

    let crawled = crawl(redirecting_image(), ROOT, params).await;
    assert_eq!(crawled.downloads(), vec!["http://site.test/r1", "http://site.test/r2"]);
    assert!(!crawled.root.contains_key("image_list"));

    let failed = crawled
        .helper()
        .load_failed_requests(list_id(&crawled.root, "failed_list"))
        .unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].reason, "Resource not retrieved");
    assert_eq!(failed[0].requests[0].request_url_absolute, "http://site.test/r2");
    assert_eq!(failed[0].requests[0].response_code, Some(301));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_object_codebase_and_archive() {
    let engine = ScriptedEngine::new()
        .with_route(
            ROOT,
            page(vec![
                DomElement::new("object")
                    .with_attr("data", "movie.swf")
                    .with_attr("codebase", "http://media.test/lib")
                    .with_attr("archive", "a.jar  b.jar"),
            ]),
        )
        .with_route("http://media.test/lib/a.jar", ScriptedPage::binary("application/java-archive", b"PK"))
        .with_route("http://media.test/lib/b.jar", ScriptedPage::binary("application/java-archive", b"PK"))
        .with_route(
            "http://media.test/lib/movie.swf",
            ScriptedPage::binary("application/x-shockwave-flash", b"FWS"),
        );
    let params = CrawlParams {
        save_objects: true,
        ..CrawlParams::default()
    };

    let crawled = crawl(engine, ROOT, params).await;
    assert_eq!(
        crawled.downloads(),
        vec![
            "http://media.test/lib/a.jar",
            "http://media.test/lib/b.jar",
            "http://media.test/lib/movie.swf",
        ]
    );

    let objects = crawled
        .helper()
        .load_files(list_id(&crawled.root, "object_list"))
        .unwrap();
    let urls: Vec<&str> = objects
        .iter()
        .map(|f| f.requests[0].request_url_absolute.as_str())
        .collect();
    assert_eq!(
        urls,
        vec![
            "http://media.test/lib/a.jar",
            "http://media.test/lib/b.jar",
            "http://media.test/lib/movie.swf",
        ]
    );
}

// ============================================================================
// BASE Tag
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn test_base_tag_in_head_changes_resolution() {
    let engine = ScriptedEngine::new()
        .with_route(
            ROOT,
            page(vec![
                DomElement::new("base").with_attr("href", "http://cdn.test/assets").in_head(),
                DomElement::new("img").with_attr("src", "logo.png"),
                DomElement::new("a").with_attr("href", "page.html"),
            ]),
        )
        .with_route("http://cdn.test/assets/logo.png", ScriptedPage::binary("image/png", b"\x89PNG"));
    let params = CrawlParams {
        save_images: true,
        ..CrawlParams::default()
    };

    let crawled = crawl(engine, ROOT, params).await;
    assert_eq!(crawled.downloads(), vec!["http://cdn.test/assets/logo.png"]);
    assert_eq!(crawled.new_object_urls(), vec!["http://cdn.test/assets/page.html"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_base_tag_after_link_is_ignored() {
    let engine = ScriptedEngine::new().with_route(
        ROOT,
        page(vec![
            DomElement::new("a").with_attr("href", "first.html").in_head(),
            DomElement::new("base").with_attr("href", "http://cdn.test/").in_head(),
            DomElement::new("a").with_attr("href", "second.html"),
        ]),
    );

    let crawled = crawl(engine, ROOT, CrawlParams::default()).await;
    assert_eq!(
        crawled.new_object_urls(),
        vec!["http://site.test/first.html", "http://site.test/second.html"]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_base_tag_outside_head_disables_later_bases() {
    let engine = ScriptedEngine::new().with_route(
        ROOT,
        page(vec![
            DomElement::new("base").with_attr("href", "http://one.test/"),
            DomElement::new("base").with_attr("href", "http://two.test/").in_head(),
            DomElement::new("a").with_attr("href", "next.html"),
        ]),
    );

    let crawled = crawl(engine, ROOT, CrawlParams::default()).await;
    assert_eq!(crawled.new_object_urls(), vec!["http://site.test/next.html"]);
}

// ============================================================================
// Repeated Sub-pages
// ============================================================================

fn twice_framed_site() -> ScriptedEngine {
    ScriptedEngine::new()
        .with_route(
            ROOT,
            ScriptedPage::html("<html></html>")
                .with_frame("iframe", "/inner")
                .with_frame("iframe", "/inner"),
        )
        .with_route("http://site.test/inner", ScriptedPage::html("<html></html>"))
}

#[tokio::test(flavor = "multi_thread")]
async fn test_repeated_frame_is_processed_once() {
    let crawled = crawl(twice_framed_site(), ROOT, CrawlParams::default()).await;
    assert_eq!(crawled.children.len(), 1);
    assert_eq!(str_attr(&crawled.children[0], "url_original"), "http://site.test/inner");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_save_multiple_keeps_repeated_frames() {
    let params = CrawlParams {
        save_multiple: true,
        ..CrawlParams::default()
    };

    let crawled = crawl(twice_framed_site(), ROOT, params).await;
    assert_eq!(crawled.children.len(), 2);
    assert!(
        crawled
            .children
            .iter()
            .all(|child| str_attr(child, "url_original") == "http://site.test/inner")
    );
}
