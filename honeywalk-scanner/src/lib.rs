pub mod chain;
pub mod engine;
pub mod error;
pub mod follower;
pub mod http_engine;
pub mod input;
pub mod links;
pub mod object;
pub mod params;
pub mod proxy;
pub mod scripts;
pub mod store;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod tree;
pub mod windows;
pub mod worker;

pub use chain::{PageChainTracker, ProcessedPage, SharedPageChains};
pub use engine::{Cookie, Engine, EngineOptions, Page, PageRequest, WebResponse};
pub use error::{CrawlError, FetchError, ParamError, StoreError};
pub use follower::{FailureLog, FollowOutcome, Follower};
pub use http_engine::HttpEngine;
pub use input::NodeInput;
pub use object::{AttributeValue, NewObject, ObjectData, ObjectType, Origin};
pub use params::CrawlParams;
pub use store::{MemoryStore, ObjectStore};
pub use tree::{CrawlTree, FlushSummary, NodeId};
pub use worker::{CrawlWorker, WorkerState};
