use anyhow::{Context, Result, anyhow};
use clap::Parser;
use tracing::instrument;

use common::entry::{self, Entry};
use common::error::ProtocolError;
use common::mask::Mask;
use common::plan::{self, DestinationIndex, PlanKind, SyncAction};

mod dump;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "ftpls",
    version,
    about = "Parse FTP directory listings and preview sync plans",
    long_about = "`ftpls` parses captured FTP `LIST` output (Unix-style or Windows-style) into typed entries,
and previews what a put, get or delete run would do against a local tree.

EXAMPLE:
    # Print the entries of a single listing
    ftpls list listing.txt --base-path /pub

    # Preview uploading ./site into /www given an `ls -lR` dump of the server
    ftpls plan server.dump ./site --direction put --server-path /www --only-newer"
)]
struct Args {
    #[command(subcommand)]
    command: Command,

    // Progress & output
    /// Verbose level (implies "summary"): -v INFO / -vv DEBUG / -vvv TRACE (default: ERROR)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true, help_heading = "Progress & output")]
    verbose: u8,

    /// Print summary at the end
    #[arg(long, global = true, help_heading = "Progress & output")]
    summary: bool,

    /// Quiet mode, don't report errors
    #[arg(short = 'q', long = "quiet", global = true, help_heading = "Progress & output")]
    quiet: bool,
}

#[derive(clap::Subcommand, Debug, Clone)]
enum Command {
    /// Parse one directory listing and print its entries
    List(ListArgs),
    /// Walk a recursive listing dump and print the plan of a put, get or delete run
    Plan(PlanArgs),
}

#[derive(clap::Args, Debug, Clone)]
struct FilterArgs {
    /// Glob pattern for paths to include (can be specified multiple times)
    ///
    /// Patterns use glob syntax: * matches anything except /, ** matches anything including /,
    /// ? matches single char, [...] for character classes. Leading / anchors to the root,
    /// trailing / matches only directories.
    #[arg(long, value_name = "PATTERN", action = clap::ArgAction::Append, help_heading = "Filtering")]
    include: Vec<String>,

    /// Glob pattern for paths to exclude (can be specified multiple times)
    ///
    /// Excludes are checked before includes.
    #[arg(long, value_name = "PATTERN", action = clap::ArgAction::Append, help_heading = "Filtering")]
    exclude: Vec<String>,
}

impl FilterArgs {
    fn mask(&self) -> Result<Mask> {
        Mask::new(&self.include, &self.exclude)
    }
}

#[derive(clap::Args, Debug, Clone)]
struct ListArgs {
    /// Listing file, `-` reads standard input
    #[arg()]
    listing: String,

    /// Directory the listing was taken from
    #[arg(long, default_value = "/", value_name = "PATH")]
    base_path: String,

    /// Use the current time for timestamps that cannot be parsed instead of failing
    #[arg(long)]
    tolerate_date_errors: bool,

    /// Print one JSON object per entry
    #[arg(long)]
    json: bool,

    #[command(flatten)]
    filter: FilterArgs,
}

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    /// local tree -> server
    Put,
    /// server -> local tree
    Get,
    /// remove from the server
    Delete,
}

#[derive(clap::Args, Debug, Clone)]
struct PlanArgs {
    /// Recursive listing dump (`ls -lR` layout), `-` reads standard input
    #[arg()]
    dump: String,

    /// Local directory to compare against
    #[arg()]
    local: Option<std::path::PathBuf>,

    #[arg(long, value_enum, default_value_t = Direction::Put)]
    direction: Direction,

    /// Remote root the dump was taken from
    #[arg(long, default_value = "/", value_name = "PATH")]
    server_path: String,

    /// Skip files whose destination copy is strictly newer
    #[arg(long)]
    only_newer: bool,

    /// Use the current time for timestamps that cannot be parsed instead of failing
    #[arg(long)]
    tolerate_date_errors: bool,

    /// Maximum number of directory listings parsed at once, 0 means no limit
    #[arg(long, default_value = "10", value_name = "N", help_heading = "Performance & throttling")]
    max_concurrent_listings: usize,

    #[command(flatten)]
    filter: FilterArgs,
}

#[derive(Debug, Default, Clone, Copy)]
struct ListSummary {
    files: usize,
    directories: usize,
    bytes: u64,
    excluded: usize,
}

impl std::fmt::Display for ListSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "files: {}\n\
            directories: {}\n\
            total size: {}\n\
            excluded: {}",
            self.files, self.directories, self.bytes, self.excluded,
        )
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct PlanSummary {
    files_matched: usize,
    files_total: usize,
    directories: usize,
    transfers: usize,
    skipped: usize,
    deletions: usize,
    work_units: i64,
}

impl std::fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "files matched: {} of {}\n\
            directories to create: {}\n\
            files to transfer: {}\n\
            files skipped (newer at destination): {}\n\
            entries to delete: {}\n\
            work units: {}",
            self.files_matched,
            self.files_total,
            self.directories,
            self.transfers,
            self.skipped,
            self.deletions,
            self.work_units,
        )
    }
}

enum Summary {
    List(ListSummary),
    Plan(PlanSummary),
}

impl std::fmt::Display for Summary {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Summary::List(summary) => write!(f, "{summary}"),
            Summary::Plan(summary) => write!(f, "{summary}"),
        }
    }
}

async fn read_input(source: &str) -> Result<String> {
    if source == "-" {
        use tokio::io::AsyncReadExt;
        let mut text = String::new();
        tokio::io::stdin()
            .read_to_string(&mut text)
            .await
            .context("failed reading standard input")?;
        return Ok(text);
    }
    tokio::fs::read_to_string(source)
        .await
        .with_context(|| format!("failed reading {source:?}"))
}

fn kind_flags(entry: &Entry) -> String {
    format!(
        "{}{}{}",
        if entry.is_dir() { 'd' } else { '-' },
        if entry.attributes.hidden { 'h' } else { '-' },
        if entry.attributes.read_only { 'r' } else { '-' },
    )
}

#[instrument(skip(args))]
async fn list(args: &ListArgs) -> Result<ListSummary> {
    let text = read_input(&args.listing).await?;
    let lines: Vec<&str> = text.lines().filter(|line| !dump::is_total_line(line)).collect();
    let base_path = entry::normalize_root(&args.base_path);
    let entries = common::listing::parse_listing(&lines[..], &base_path, args.tolerate_date_errors)
        .with_context(|| format!("failed parsing listing {:?}", args.listing))?;
    let mask = args.filter.mask()?;
    let mut summary = ListSummary::default();
    for entry in &entries {
        if !mask.is_match(&entry.relative_to(&base_path), entry.is_dir()) {
            summary.excluded += 1;
            continue;
        }
        if args.json {
            println!("{}", serde_json::to_string(entry)?);
        } else {
            println!(
                "{} {:>12} {} {}",
                kind_flags(entry),
                entry.size().map_or_else(|| "-".to_string(), |size| size.to_string()),
                entry.last_modified.format("%Y-%m-%d %H:%M"),
                entry.full_path
            );
        }
        match entry.size() {
            Some(size) => {
                summary.files += 1;
                summary.bytes += size;
            }
            None => summary.directories += 1,
        }
    }
    Ok(summary)
}

#[instrument(skip(args))]
async fn preview(args: &PlanArgs) -> Result<PlanSummary> {
    let text = read_input(&args.dump).await?;
    let server_path = entry::normalize_root(&args.server_path);
    let dump = dump::Dump::parse(&text, &server_path);
    tracing::debug!("dump of {:?} has {} sections", server_path, dump.len());
    let mask = args.filter.mask()?;
    let gate = throttle::AdmissionGate::new(args.max_concurrent_listings);
    let missing_root_is_empty = args.direction == Direction::Put;
    let remote = common::walk::walk(
        &server_path,
        |path| {
            let dump = &dump;
            let server_path = &server_path;
            async move {
                match dump.lines(&path) {
                    Some(lines) => {
                        common::listing::parse_listing(lines, &path, args.tolerate_date_errors)
                    }
                    None if missing_root_is_empty && path == *server_path => Ok(Vec::new()),
                    None => Err(ProtocolError::new(
                        common::error::FILE_UNAVAILABLE,
                        format!("{path}: No such file or directory"),
                    )
                    .into()),
                }
            }
        },
        &tokio_util::sync::CancellationToken::new(),
        &gate,
    )
    .await
    .context("failed walking the listing dump")?;
    let local_root = args.local.as_deref();
    let local_entries = match local_root {
        Some(root) if root.exists() => common::local::list_recursive(root, &mask)
            .await
            .with_context(|| format!("failed listing {root:?}"))?,
        Some(root) if args.direction == Direction::Put => {
            return Err(anyhow!("local directory {:?} does not exist", root));
        }
        None if args.direction != Direction::Delete => {
            return Err(anyhow!("a local directory is required for {:?}", args.direction));
        }
        _ => Vec::new(),
    };
    let local_base = local_root
        .map(common::local::to_slash)
        .unwrap_or_default();
    let plan = match args.direction {
        Direction::Put => {
            let index = DestinationIndex::from_entries(&remote, &server_path, &mask);
            plan::plan(
                &local_entries,
                &local_base,
                Some(&index),
                &mask,
                args.only_newer,
                PlanKind::Transfer,
            )
        }
        Direction::Get => {
            let index = DestinationIndex::from_entries(&local_entries, &local_base, &mask);
            plan::plan(
                &remote,
                &server_path,
                Some(&index),
                &mask,
                args.only_newer,
                PlanKind::Transfer,
            )
        }
        Direction::Delete => plan::plan(&remote, &server_path, None, &mask, false, PlanKind::Delete),
    };
    let mut summary = PlanSummary {
        files_matched: plan.matched_files,
        files_total: plan.total_files,
        work_units: plan.total_weight(),
        ..Default::default()
    };
    tracing::info!(
        "File mask matched {} of {} files.",
        plan.matched_files,
        plan.total_files
    );
    for item in &plan.items {
        let label = match item.action {
            SyncAction::CreateDir => {
                summary.directories += 1;
                "mkdir"
            }
            SyncAction::Transfer => {
                summary.transfers += 1;
                if args.direction == Direction::Put {
                    "send"
                } else {
                    "get"
                }
            }
            SyncAction::SkipNewer => {
                summary.skipped += 1;
                "skip"
            }
            SyncAction::Delete => {
                summary.deletions += 1;
                if item.entry.is_dir() { "rmdir" } else { "delete" }
            }
        };
        println!("{label:<6} {}", item.relative_path);
    }
    Ok(summary)
}

#[instrument]
async fn async_main(args: Args) -> Result<Summary> {
    match &args.command {
        Command::List(list_args) => Ok(Summary::List(list(list_args).await?)),
        Command::Plan(plan_args) => Ok(Summary::Plan(preview(plan_args).await?)),
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let func = {
        let args = args.clone();
        || async_main(args)
    };
    let output = common::OutputConfig {
        quiet: args.quiet,
        verbose: args.verbose,
        print_summary: args.summary,
    };
    let res = common::run(&output, 0, func);
    if res.is_none() {
        std::process::exit(1);
    }
    Ok(())
}
