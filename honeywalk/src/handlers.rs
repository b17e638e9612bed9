use anyhow::{Context, Result, anyhow, bail};
use clap::ArgMatches;
use colored::Colorize;
use honeywalk_core::data::{Database, JobStatus};
use honeywalk_core::report::{
    ReportFormat, gather_report_data, generate_json_report, generate_text_report, save_report,
};
use honeywalk_core::task::{CrawlTask, TaskReport};
use honeywalk_scanner::{CrawlParams, HttpEngine, NodeInput, ParamError};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use url::Url;

pub const DATABASE_FILE: &str = "honeywalk.db";

pub fn print_banner() {
    println!(
        "{}",
        r#"
  _                                       _ _
 | |__   ___  _ __   ___ _   ___      ____ _| | | __
 | '_ \ / _ \| '_ \ / _ \ | | \ \ /\ / / _` | | |/ /
 | | | | (_) | | | |  __/ |_| |\ V  V / (_| | |   <
 |_| |_|\___/|_| |_|\___|\__, | \_/\_/ \__,_|_|_|\_\
                         |___/
"#
        .bright_yellow()
    );
    println!("  {} v{}\n", "honeyclient crawl controller".dimmed(), env!("CARGO_PKG_VERSION"));
}

// Helper functions for crawl handler

/// Load URLs from either a file or a single URL argument
pub fn load_urls_from_source(url: Option<&Url>, hosts_file: Option<&PathBuf>) -> Result<Vec<String>, String> {
    if let Some(hosts_file_path) = hosts_file {
        load_urls_from_file(hosts_file_path)
    } else if let Some(url) = url {
        Ok(vec![url.as_str().to_string()])
    } else {
        Err("Either --url or --hosts-file must be provided".to_string())
    }
}

/// Load and parse URLs from a file. Lines starting with `#` are skipped.
pub fn load_urls_from_file(path: &PathBuf) -> Result<Vec<String>, String> {
    let content =
        fs::read_to_string(path).map_err(|e| format!("Failed to read hosts file {}: {}", path.display(), e))?;

    let urls: Vec<String> = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(parse_url_line)
        .collect();

    if urls.is_empty() {
        return Err(format!("No valid URLs found in {}", path.display()));
    }

    Ok(urls)
}

/// Parse a single line as a URL, trying to add http:// if needed
pub fn parse_url_line(line: &str) -> Option<String> {
    if let Ok(url) = Url::parse(line)
        && url.has_host()
    {
        return Some(line.to_string());
    }

    let with_scheme = format!("http://{}", line);
    if Url::parse(&with_scheme).is_ok() {
        return Some(with_scheme);
    }

    eprintln!("⚠️  Skipping invalid URL '{}'", line);
    None
}

/// Splits a `key=value` crawl parameter.
pub fn parse_param(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => Ok((key.trim().to_string(), value.trim().to_string())),
        _ => Err(format!("expected key=value, got '{}'", raw)),
    }
}

pub fn build_params(pairs: &[(String, String)]) -> Result<CrawlParams, ParamError> {
    CrawlParams::from_pairs(pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
}

/// Database file inside a configuration directory, with `~` expanded.
pub fn database_path(config_dir: &str) -> PathBuf {
    let expanded = shellexpand::tilde(config_dir);
    Path::new(expanded.as_ref()).join(DATABASE_FILE)
}

fn open_database(config_dir: &str) -> Result<Database> {
    let db_path = database_path(config_dir);
    if !Database::exists(&db_path) {
        bail!(
            "No database at {}. Run `honeywalk init` first.",
            db_path.display()
        );
    }
    Database::new(&db_path).with_context(|| format!("Failed to open database {}", db_path.display()))
}

fn print_divider() {
    println!("{}", "═".repeat(60).bright_blue().bold());
}

fn print_prompt(msg: &str) -> Result<String> {
    print!("{} ", msg.bright_cyan().bold());
    io::stdout().flush()?;
    let mut response = String::new();
    io::stdin().read_line(&mut response)?;
    Ok(response.trim().to_lowercase())
}

pub fn handle_init(args: &ArgMatches) -> Result<()> {
    print_divider();
    println!("{}", "  HONEYWALK INITIALIZATION".bright_white().bold());
    print_divider();
    println!();

    let config_dir = args
        .get_one::<String>("PATH")
        .ok_or_else(|| anyhow!("missing database location"))?;
    let force = args.get_flag("force");
    let db_loc = database_path(config_dir);
    let db_path = db_loc.as_path();
    let honeywalk_config_dir = db_path
        .parent()
        .ok_or_else(|| anyhow!("Invalid database path {}", db_path.display()))?;

    println!(
        "{} Target: {}",
        "→".blue(),
        honeywalk_config_dir.display().to_string().bright_white()
    );
    println!();

    if Database::exists(db_path) {
        let overwrite = if force {
            println!("{} Deleting existing database (force mode)", "→".yellow().bold());
            true
        } else {
            println!("{}", "⚠ WARNING".yellow().bold());
            println!("Database already exists at:");
            println!("  {} {}", "•".yellow(), db_path.display().to_string().bright_white());
            println!();
            let response = print_prompt("Would you like to overwrite it? [y/N]:")?;
            println!();
            response == "y" || response == "yes"
        };

        if !overwrite {
            println!("{} Keeping existing database", "→".blue());
            return Ok(());
        }
        Database::drop(db_path).with_context(|| format!("Failed to remove {}", db_path.display()))?;
        println!("{} Existing database removed", "✓".green().bold());
        println!();
    }

    println!("{} Creating directory structure...", "→".blue());
    fs::create_dir_all(honeywalk_config_dir)
        .with_context(|| format!("Failed to create config directory {}", honeywalk_config_dir.display()))?;

    println!("{} Creating database...", "→".blue());
    Database::new(db_path).with_context(|| format!("Failed to create database {}", db_path.display()))?;

    println!();
    print_divider();
    println!("{}", "  INITIALIZATION COMPLETE".green().bold());
    print_divider();
    println!();
    println!(
        "{} Database: {}",
        "✓".green().bold(),
        db_path.display().to_string().bright_white()
    );
    println!();
    Ok(())
}

#[derive(Debug, Clone)]
pub struct CrawlOptions {
    pub params: CrawlParams,
    pub proxy: Option<String>,
    pub threads: usize,
    pub show_progress: bool,
}

impl Default for CrawlOptions {
    fn default() -> Self {
        Self {
            params: CrawlParams::default(),
            proxy: None,
            threads: 4,
            show_progress: false,
        }
    }
}

#[derive(Debug)]
pub struct CrawlSummary {
    pub job: u64,
    pub reports: Vec<TaskReport>,
}

/// Creates a job and crawls every URL with its own engine, at most
/// `options.threads` at a time.
pub async fn run_crawl(db: Arc<Database>, urls: Vec<String>, options: CrawlOptions) -> Result<CrawlSummary> {
    let configuration = serde_json::to_string(&options.params)?;
    let job = db.create_job(&urls, Some(configuration.as_str()))?;
    info!("Job {} created for {} URL(s)", job, urls.len());

    let progress = if options.show_progress {
        let pb = ProgressBar::new(urls.len() as u64);
        pb.set_style(ProgressStyle::default_bar().template("{spinner:.cyan} [{bar:30.cyan/blue}] {pos}/{len} {msg}")?);
        pb
    } else {
        ProgressBar::hidden()
    };

    let semaphore = Arc::new(Semaphore::new(options.threads.max(1)));
    let mut tasks = JoinSet::new();
    for url in urls {
        let permit = Arc::clone(&semaphore).acquire_owned().await?;
        let db = Arc::clone(&db);
        let params = options.params.clone();
        let proxy = options.proxy.clone();
        let progress = progress.clone();
        tasks.spawn(async move {
            let _permit = permit;
            progress.set_message(url.clone());

            let mut task = CrawlTask::new(job, NodeInput::new(url), params);
            if let Some(proxy) = proxy {
                task = task.with_proxy(proxy);
            }
            let engine = Arc::new(HttpEngine::new(Handle::current()));
            let report = task.run(engine, db).await;
            progress.inc(1);
            report
        });
    }

    let mut reports = Vec::new();
    let mut failed = None;
    while let Some(joined) = tasks.join_next().await {
        match joined? {
            Ok(report) => reports.push(report),
            Err(e) => {
                warn!("Crawl task of job {} could not be saved: {:#}", job, e);
                failed = Some(e);
            }
        }
    }
    progress.finish_and_clear();

    match failed {
        Some(e) => {
            db.finish_job(job, JobStatus::Failed)?;
            Err(e)
        }
        None => {
            db.finish_job(job, JobStatus::Completed)?;
            Ok(CrawlSummary { job, reports })
        }
    }
}

pub async fn handle_crawl(sub_matches: &ArgMatches) -> Result<()> {
    // RUST_LOG overrides the default level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();

    let url = sub_matches.get_one::<Url>("url");
    let hosts_file = sub_matches.get_one::<PathBuf>("hosts-file");
    let threads = sub_matches.get_one::<usize>("threads").copied().unwrap_or(4);
    let config_dir = sub_matches
        .get_one::<String>("db")
        .map(String::as_str)
        .unwrap_or("~/.config/honeywalk/");
    let pairs: Vec<(String, String)> = sub_matches
        .get_many::<(String, String)>("param")
        .map(|values| values.cloned().collect())
        .unwrap_or_default();

    let urls = load_urls_from_source(url, hosts_file).map_err(|e| anyhow!(e))?;
    let params = build_params(&pairs)?;
    let db = Arc::new(open_database(config_dir)?);

    println!("\n🕷️  Crawling {} URL(s)", urls.len());
    println!("Workers: {}", threads);
    println!("Redirect depth limit: {}", params.redirect_depth_limit);
    println!("Processing timeout: {} ms\n", params.processing_timeout);

    let options = CrawlOptions {
        params,
        proxy: sub_matches.get_one::<String>("proxy").cloned(),
        threads,
        show_progress: true,
    };
    let summary = run_crawl(db, urls, options).await?;

    println!("\n{} Crawl complete! (job {})\n", "✓".green().bold(), summary.job);
    for report in &summary.reports {
        if report.successful {
            println!(
                "  {} {}  {} node(s), {} new object(s)",
                "✓".green(),
                report.url,
                report.nodes,
                report.new_objects
            );
        } else {
            println!(
                "  {} {}  {}",
                "✗".red(),
                report.url,
                report.failure_message.as_deref().unwrap_or("failed").red()
            );
        }
        if let Some(warning) = &report.warning {
            println!("    {} {}", "⚠".yellow(), warning.yellow());
        }
    }
    println!(
        "\nRun {} for the full report.",
        format!("honeywalk report --job {}", summary.job).bright_white()
    );
    Ok(())
}

pub fn handle_report(sub_matches: &ArgMatches) -> Result<()> {
    let config_dir = sub_matches
        .get_one::<String>("db")
        .map(String::as_str)
        .unwrap_or("~/.config/honeywalk/");
    let db = open_database(config_dir)?;

    let job = match sub_matches.get_one::<u64>("job") {
        Some(job) => *job,
        None => db.latest_job()?.ok_or_else(|| anyhow!("No crawl jobs recorded yet"))?,
    };
    let format = sub_matches
        .get_one::<String>("format")
        .and_then(|f| ReportFormat::from_str(f))
        .unwrap_or(ReportFormat::Text);

    let data = gather_report_data(&db, job).with_context(|| format!("Failed to load job {}", job))?;
    let content = match format {
        ReportFormat::Text => generate_text_report(&data),
        ReportFormat::Json => generate_json_report(&data)?,
    };

    match sub_matches.get_one::<PathBuf>("output") {
        Some(path) => {
            save_report(&content, path).with_context(|| format!("Failed to write {}", path.display()))?;
            println!("{} Report saved to {}", "✓".green().bold(), path.display());
        }
        None => print!("{}", content),
    }
    Ok(())
}
