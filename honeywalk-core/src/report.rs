// Report generation from database

use crate::data::{Database, JobInfo, StoredObject};
use colored::Colorize;
use honeywalk_scanner::{AttributeValue, StoreError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::Write;
use std::path::Path;

const BANNER: &str = "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportFormat {
    Text,
    Json,
}

impl ReportFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "text" | "txt" => Some(ReportFormat::Text),
            "json" => Some(ReportFormat::Json),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportData {
    pub job: JobInfo,
    pub pages: Vec<PageEntry>,
    pub new_objects: Vec<NewObjectEntry>,
    pub summary: ReportSummary,
}

/// One crawl tree node as stored in `objects`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageEntry {
    pub id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_code: Option<i64>,
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason_failed: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewObjectEntry {
    pub id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<u64>,
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub total_pages: usize,
    pub active_pages: usize,
    pub failed_pages: usize,
    pub warnings: usize,
    pub links: usize,
    pub files: usize,
}

impl From<&StoredObject> for PageEntry {
    fn from(object: &StoredObject) -> Self {
        let text = |name: &str| object.attribute_str(name).map(str::to_string);
        PageEntry {
            id: object.id,
            parent: object.parent,
            url: text("url_original"),
            origin: text("origin"),
            http_code: object.attributes.get("http_code").and_then(AttributeValue::as_int),
            active: object
                .attributes
                .get("active")
                .and_then(AttributeValue::as_bool)
                .unwrap_or(false),
            reason_failed: text("reason_failed"),
            warning: text("warning"),
        }
    }
}

impl From<&StoredObject> for NewObjectEntry {
    fn from(object: &StoredObject) -> Self {
        let text = |name: &str| object.attribute_str(name).map(str::to_string);
        NewObjectEntry {
            id: object.id,
            parent: object.parent,
            kind: text("type").unwrap_or_else(|| "unknown".to_string()),
            url: text("url_original"),
            origin: text("origin"),
            mime_type: text("mime_type"),
        }
    }
}

pub fn gather_report_data(db: &Database, job: u64) -> Result<ReportData, StoreError> {
    let info = db
        .job(job)
        .map_err(|e| StoreError::Backend(e.to_string()))?
        .ok_or(StoreError::NotFound(job))?;

    let pages: Vec<PageEntry> = db.objects_for_job(job)?.iter().map(PageEntry::from).collect();
    let new_objects: Vec<NewObjectEntry> = db
        .new_objects_for_job(job)?
        .iter()
        .map(NewObjectEntry::from)
        .collect();

    let summary = ReportSummary {
        total_pages: pages.len(),
        active_pages: pages.iter().filter(|p| p.active).count(),
        failed_pages: pages.iter().filter(|p| !p.active).count(),
        warnings: pages.iter().filter(|p| p.warning.is_some()).count(),
        links: new_objects.iter().filter(|o| o.kind == "url").count(),
        files: new_objects.iter().filter(|o| o.kind == "file").count(),
    };

    Ok(ReportData {
        job: info,
        pages,
        new_objects,
        summary,
    })
}

pub fn generate_text_report(data: &ReportData) -> String {
    let mut report = String::new();

    // Header
    report.push_str(&format!("{}\n", BANNER));
    report.push_str(&format!("{}\n", "                          HONEYWALK CRAWL REPORT".bold()));
    report.push_str(&format!("{}\n\n", BANNER));

    report.push_str(&format!("Job ID:       {}\n", data.job.id));
    report.push_str(&format!("Status:       {}\n", status_label(&data.job.status)));
    report.push_str(&format!("Started:      {}\n", format_timestamp(data.job.start_time)));
    if let Some(end_time) = data.job.end_time {
        report.push_str(&format!("Duration:     {} seconds\n", end_time - data.job.start_time));
    }
    report.push_str(&format!("Targets:      {}\n", format_targets(&data.job.seed_urls)));
    report.push('\n');

    // Summary
    report.push_str(&format!("{}\n", BANNER));
    report.push_str("SUMMARY\n");
    report.push_str(&format!("{}\n\n", BANNER));
    report.push_str(&format!("Pages:        {}\n", data.summary.total_pages));
    report.push_str(&format!("  Active:     {}\n", data.summary.active_pages.to_string().green()));
    report.push_str(&format!("  Failed:     {}\n", data.summary.failed_pages.to_string().red()));
    report.push_str(&format!("  Warnings:   {}\n", data.summary.warnings.to_string().yellow()));
    report.push_str(&format!("New links:    {}\n", data.summary.links));
    report.push_str(&format!("New files:    {}\n", data.summary.files));
    report.push('\n');

    // Crawl trees
    report.push_str(&format!("{}\n", BANNER));
    report.push_str("CRAWL TREES\n");
    report.push_str(&format!("{}\n\n", BANNER));
    report.push_str(&render_trees(&data.pages));
    report.push('\n');

    if !data.new_objects.is_empty() {
        report.push_str(&format!("{}\n", BANNER));
        report.push_str("NEW OBJECTS\n");
        report.push_str(&format!("{}\n\n", BANNER));
        for object in &data.new_objects {
            let url = object.url.as_deref().unwrap_or("?");
            let detail = match (&object.origin, &object.mime_type) {
                (Some(origin), _) => origin.clone(),
                (None, Some(mime)) => mime.clone(),
                (None, None) => String::new(),
            };
            report.push_str(&format!("  [{}] {}  {}\n", object.kind, url, detail.dimmed()));
        }
        report.push('\n');
    }

    // Footer
    report.push_str(&format!("{}\n", BANNER));
    report.push_str("                          End of Report\n");
    report.push_str(&format!("{}\n", BANNER));
    report.push_str("\nGenerated by Honeywalk - a honeyclient crawl controller\n\n");

    report
}

pub fn generate_json_report(data: &ReportData) -> Result<String, serde_json::Error> {
    let json_report = serde_json::json!({
        "report": {
            "metadata": {
                "generator": "Honeywalk",
                "version": env!("CARGO_PKG_VERSION"),
                "generated_at": chrono::Utc::now().to_rfc3339(),
                "format": "json"
            },
            "job": {
                "id": data.job.id,
                "status": data.job.status,
                "start_time": format_iso8601_timestamp(data.job.start_time),
                "end_time": data.job.end_time.map(format_iso8601_timestamp),
                "duration_seconds": data.job.end_time.map(|end| end - data.job.start_time),
                "targets": data.job.seed_urls
            },
            "summary": data.summary,
            "pages": data.pages,
            "new_objects": data.new_objects
        }
    });

    serde_json::to_string_pretty(&json_report)
}

pub fn save_report(content: &str, path: &Path) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(content.as_bytes())?;
    Ok(())
}

// Helper functions
fn status_label(status: &str) -> String {
    match status {
        "completed" => "Completed".green().to_string(),
        "failed" => "Failed".red().to_string(),
        "running" => "Running".yellow().to_string(),
        _ => "Unknown".to_string(),
    }
}

fn format_timestamp(timestamp: i64) -> String {
    use chrono::{DateTime, Utc};
    let datetime = DateTime::<Utc>::from_timestamp(timestamp, 0).unwrap_or_else(Utc::now);
    datetime.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

fn format_iso8601_timestamp(timestamp: i64) -> String {
    use chrono::{DateTime, Utc};
    let datetime = DateTime::<Utc>::from_timestamp(timestamp, 0).unwrap_or_else(Utc::now);
    datetime.to_rfc3339()
}

fn format_targets(urls: &[String]) -> String {
    match urls {
        [] => "Unknown".to_string(),
        [single] => single.clone(),
        many => format!("{} URLs", many.len()),
    }
}

fn render_trees(pages: &[PageEntry]) -> String {
    if pages.is_empty() {
        return "  (empty)\n".to_string();
    }

    let known: HashSet<u64> = pages.iter().map(|p| p.id).collect();
    let mut children: BTreeMap<u64, Vec<&PageEntry>> = BTreeMap::new();
    let mut roots = Vec::new();
    for page in pages {
        match page.parent.filter(|parent| known.contains(parent)) {
            Some(parent) => children.entry(parent).or_default().push(page),
            None => roots.push(page),
        }
    }

    let mut result = String::new();
    for root in roots {
        result.push_str(&page_line(root));
        result.push('\n');
        render_children(root.id, &children, "", &mut result);
    }
    result
}

fn render_children(id: u64, children: &BTreeMap<u64, Vec<&PageEntry>>, indent: &str, out: &mut String) {
    let Some(nodes) = children.get(&id) else {
        return;
    };
    for (i, node) in nodes.iter().enumerate() {
        let is_last = i == nodes.len() - 1;
        let prefix = if is_last { "└── " } else { "├── " };
        out.push_str(&format!("{}{}{}\n", indent, prefix, page_line(node)));

        let next_indent = format!("{}{}", indent, if is_last { "    " } else { "│   " });
        render_children(node.id, children, &next_indent, out);
    }
}

fn page_line(page: &PageEntry) -> String {
    let url = page
        .url
        .clone()
        .unwrap_or_else(|| format!("(object {})", page.id));

    let status_indicator = match (page.active, page.http_code) {
        (false, _) => "✗".red(),
        (true, Some(200..=299)) => "✓".green(),
        (true, Some(300..=399)) => "→".cyan(),
        (true, Some(400..=599)) => "⚠".yellow(),
        (true, _) => "?".normal(),
    };
    let code = page
        .http_code
        .map(|c| c.to_string())
        .unwrap_or_else(|| "-".to_string());

    let mut line = format!("{}  [{} {}]", url, status_indicator, code);
    if let Some(origin) = &page.origin {
        line.push_str(&format!(" {}", origin.dimmed()));
    }
    if let Some(reason) = &page.reason_failed {
        line.push_str(&format!("  {}", reason.red()));
    }
    if let Some(warning) = &page.warning {
        line.push_str(&format!("  {}", warning.yellow()));
    }
    line
}
