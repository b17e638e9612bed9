// Include handlers module directly from handlers.rs
#[path = "handlers.rs"]
pub mod handlers;

// Re-export commonly used handler functions for convenience
pub use handlers::{
    CrawlOptions, CrawlSummary, build_params, database_path, load_urls_from_file, load_urls_from_source,
    parse_param, parse_url_line, run_crawl,
};
