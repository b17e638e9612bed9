// One crawl task: a single seed URL followed to completion and flushed to a store

use anyhow::Result;
use honeywalk_scanner::engine::Cookie;
use honeywalk_scanner::store::{DataStoreHelper, RequestRecord};
use honeywalk_scanner::{CrawlParams, CrawlTree, Engine, Follower, NodeInput, ObjectStore, WorkerState};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

pub struct CrawlTask {
    job: u64,
    input: NodeInput,
    params: CrawlParams,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskReport {
    pub url: String,
    pub successful: bool,
    pub failure_message: Option<String>,
    pub warning: Option<String>,
    pub state: WorkerState,
    pub root_id: Option<u64>,
    pub nodes: usize,
    pub new_objects: usize,
}

impl CrawlTask {
    pub fn new(job: u64, input: NodeInput, params: CrawlParams) -> Self {
        Self { job, input, params }
    }

    /// Attaches to an object that already exists in the store instead of
    /// creating a fresh root.
    pub fn with_object_id(mut self, id: u64) -> Self {
        self.input = self.input.with_object_id(id);
        self
    }

    pub fn with_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.input = self.input.with_proxy(proxy);
        self
    }

    pub fn input(&self) -> &NodeInput {
        &self.input
    }

    pub async fn run(&self, engine: Arc<dyn Engine>, store: Arc<dyn ObjectStore>) -> Result<TaskReport> {
        let url = self.input.url_original().to_string();
        info!("Starting crawl task for {}", url);

        let cookies = self.referrer_cookies(store.as_ref());
        let follower = Follower::new(&self.input, self.params.clone(), engine, Arc::clone(&store), self.job)
            .with_cookies(cookies);

        let outcome = follower.process_url(self.fresh_tree()).await;
        let mut tree = match outcome.tree {
            Some(tree) => tree,
            None => {
                warn!("Crawl tree for {} was not handed back, saving the root only", url);
                self.fresh_tree()
            }
        };

        tree.return_to_root();
        if self.input.object_id.is_none() {
            tree.add_attribute("type", "url");
            tree.add_attribute("url_original", url.as_str());
        }
        if !outcome.successful {
            let reason = outcome.failure_message.clone().unwrap_or_default();
            tree.add_attribute("active", false);
            tree.add_attribute("reason_failed", reason);
            if tree.root().attribute("http_request").is_none() {
                let request = RequestRecord::new(url.as_str(), self.input.url_for_processing());
                let id = DataStoreHelper::new(store.as_ref(), self.job).save_request(&request)?;
                tree.add_reference("http_request", id);
            }
        }
        if let Some(warning) = &outcome.warning
            && !tree.warnings().contains(warning)
        {
            tree.add_warning(warning.clone());
        }

        let summary = tree.flush(store.as_ref(), self.job)?;
        info!(
            "Crawl task for {} finished: {} node(s), {} new object(s)",
            url, summary.nodes, summary.new_objects
        );

        Ok(TaskReport {
            url,
            successful: outcome.successful,
            failure_message: outcome.failure_message,
            warning: outcome.warning,
            state: outcome.state,
            root_id: summary.root_id,
            nodes: summary.nodes,
            new_objects: summary.new_objects,
        })
    }

    fn fresh_tree(&self) -> CrawlTree {
        let mut tree = CrawlTree::new(self.input.clone(), &self.params);
        tree.web_context_init(
            self.input.url_original(),
            self.input.referrer.clone(),
            self.input.referrer_cookie_id,
        );
        tree
    }

    fn referrer_cookies(&self, store: &dyn ObjectStore) -> Vec<Cookie> {
        let Some(id) = self.input.referrer_cookie_id else {
            return Vec::new();
        };
        match DataStoreHelper::new(store, self.job).load_cookies(id) {
            Ok(records) => records.iter().map(Cookie::from).collect(),
            Err(e) => {
                warn!("Could not restore referrer cookies {}: {}", id, e);
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use honeywalk_scanner::MemoryStore;
    use honeywalk_scanner::testing::{ScriptedEngine, ScriptedPage};

    #[tokio::test(flavor = "multi_thread")]
    async fn test_referrer_cookies_are_restored() {
        let store = MemoryStore::new();
        let helper = DataStoreHelper::new(&store, 1);
        let cookie = Cookie {
            name: "sid".into(),
            value: "abc".into(),
            domain: "site.test".into(),
            path: "/".into(),
            secure: false,
        };
        let id = helper
            .save_cookies(&[honeywalk_scanner::store::CookieRecord::from(&cookie)])
            .unwrap();

        let task = CrawlTask::new(1, NodeInput::new("http://site.test/").with_referrer_cookie(id), CrawlParams::default());
        assert_eq!(task.referrer_cookies(&store), vec![cookie]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_missing_referrer_cookies_are_skipped() {
        let store = MemoryStore::new();
        let task = CrawlTask::new(1, NodeInput::new("http://site.test/").with_referrer_cookie(99), CrawlParams::default());
        assert!(task.referrer_cookies(&store).is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_run_reports_node_count() {
        let engine = ScriptedEngine::new().with_route("http://site.test/", ScriptedPage::html("<html></html>"));
        let store = Arc::new(MemoryStore::new());
        let task = CrawlTask::new(1, NodeInput::new("http://site.test/"), CrawlParams::default());

        let report = task.run(Arc::new(engine), store).await.unwrap();
        assert!(report.successful);
        assert_eq!(report.nodes, 1);
        assert!(report.root_id.is_some());
    }
}
