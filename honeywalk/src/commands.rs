use crate::CLAP_STYLING;
use clap::{arg, command};
use honeywalk::handlers::parse_param;
use url::Url;

pub(crate) fn command_argument_builder() -> clap::Command {
    clap::Command::new("honeywalk")
        .version(env!("CARGO_PKG_VERSION"))
        .bin_name("honeywalk")
        .styles(CLAP_STYLING)
        .arg(arg!(-q --"quiet" "Suppress banner and non-essential output").required(false))
        .subcommand_required(false)
        .subcommand(
            command!("init")
                .about("Initializes the honeywalk database on your filesystem")
                .arg(
                    arg!([PATH])
                        .required(false)
                        .help("Location to store the honeywalk database")
                        .default_value("~/.config/honeywalk/"),
                )
                .arg(
                    arg!(-f - -"force")
                        .help(
                            "Forces the overwriting of any existing database at the specified \
                        location.",
                        )
                        .required(false),
                ),
        )
        .subcommand(
            command!("crawl")
                .about(
                    "Visit a URL or collection of URLs, following redirects and frames, and \
                store the resulting crawl trees.",
                )
                .arg(
                    arg!(-u --"url" <URL>)
                        .required(false)
                        .help("The URL to crawl")
                        .value_parser(clap::value_parser!(Url))
                        .conflicts_with("hosts-file"),
                )
                .arg(
                    arg!(-H --"hosts-file" <PATH>)
                        .required(false)
                        .help("Path to a newline-delimited file of URLs to crawl")
                        .value_parser(clap::value_parser!(std::path::PathBuf))
                        .conflicts_with("url"),
                )
                .arg(
                    arg!(--"db" <PATH>)
                        .required(false)
                        .help("Directory holding the honeywalk database")
                        .default_value("~/.config/honeywalk/"),
                )
                .arg(
                    arg!(-p --"param" <KEY_VALUE>)
                        .required(false)
                        .help("Crawl parameter as key=value, e.g. page_timeout=10000 (repeatable)")
                        .value_parser(parse_param)
                        .action(clap::ArgAction::Append),
                )
                .arg(
                    arg!(--"proxy" <PROXY>)
                        .required(false)
                        .help("Proxy for all requests: http://[user:pass@]host[:port] or socks://host:port"),
                )
                .arg(
                    arg!(-t --"threads" <NUM_WORKERS>)
                        .required(false)
                        .help("The number of URLs crawled at the same time")
                        .value_parser(clap::value_parser!(usize))
                        .default_value("4"),
                ),
        )
        .subcommand(
            command!("report")
                .about("Summarise the crawl trees stored for a job")
                .arg(
                    arg!(-j --"job" <ID>)
                        .required(false)
                        .help("Job to report on (default: the most recent job)")
                        .value_parser(clap::value_parser!(u64)),
                )
                .arg(
                    arg!(--"db" <PATH>)
                        .required(false)
                        .help("Directory holding the honeywalk database")
                        .default_value("~/.config/honeywalk/"),
                )
                .arg(
                    arg!(-f --"format" <FORMAT>)
                        .required(false)
                        .help("Report format: text, json")
                        .value_parser(["text", "json"])
                        .default_value("text"),
                )
                .arg(
                    arg!(-o --"output" <PATH>)
                        .required(false)
                        .help("Save report to file (default: display to screen)")
                        .value_parser(clap::value_parser!(std::path::PathBuf)),
                ),
        )
}
