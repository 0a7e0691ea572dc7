use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use clap::{Args, CommandFactory, Parser, Subcommand};
use spmirror_core::config::{MirrorConfig, load_config};
use spmirror_core::log::LOG_FILE_NAME;
use spmirror_core::manifest::{MANIFEST_FILE_NAME, read_manifest};
use spmirror_core::verify::verify_mirror;

#[derive(Debug, Parser)]
#[command(
    name = "spmirror",
    version,
    about = "Mirror a browser-rendered wiki into a browsable local tree"
)]
struct Cli {
    #[arg(
        long,
        global = true,
        value_name = "PATH",
        help = "Config file (default: spmirror.toml in the working directory)"
    )]
    config: Option<PathBuf>,
    #[arg(
        long,
        global = true,
        value_name = "PATH",
        help = "Directory the mirror tree is created under (default: working directory)"
    )]
    out: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Crawl the wiki and build the local mirror")]
    Mirror(MirrorArgs),
    #[command(about = "Audit an existing mirror for dangling relative links")]
    Verify,
    #[command(about = "Show the resolved configuration and mirror state")]
    Status,
}

#[derive(Debug, Args)]
struct MirrorArgs {
    #[arg(long, help = "Run the browser without a window (skips interactive logon)")]
    headless: bool,
    #[arg(
        long,
        value_name = "SECS",
        default_value_t = 60,
        help = "Interactive logon window before the crawl starts"
    )]
    login_wait_secs: u64,
    #[arg(long, value_name = "N", help = "Override the recursion depth limit")]
    max_depth: Option<usize>,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = load_config(&config_path(&cli))?;
    let mirror_root = resolve_mirror_root(&cli, &config)?;

    match cli.command {
        Some(Commands::Mirror(args)) => run_mirror_command(config, &mirror_root, args),
        Some(Commands::Verify) => run_verify(&mirror_root),
        Some(Commands::Status) => run_status(&config, &mirror_root),
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn config_path(cli: &Cli) -> PathBuf {
    cli.config
        .clone()
        .unwrap_or_else(|| PathBuf::from("spmirror.toml"))
}

fn resolve_mirror_root(cli: &Cli, config: &MirrorConfig) -> Result<PathBuf> {
    let base = match &cli.out {
        Some(out) => out.clone(),
        None => env::current_dir()?,
    };
    config.mirror_root(&base)
}

#[cfg(feature = "browser")]
fn run_mirror_command(mut config: MirrorConfig, mirror_root: &Path, args: MirrorArgs) -> Result<()> {
    use spmirror_core::crawler::run_mirror;
    use spmirror_core::fetch::HttpFetcher;
    use spmirror_core::session::{BrowserSession, ChromeSession};

    if let Some(max_depth) = args.max_depth {
        config.crawl.max_depth = Some(max_depth);
    }
    let root_url = config.root_url()?;

    let mut session = ChromeSession::launch(args.headless)?;
    if !args.headless {
        println!("Log on in the browser window; the crawl starts in {}s.", args.login_wait_secs);
        session.interactive_logon(&root_url, args.login_wait_secs)?;
    }
    let cookies = session.cookies()?;
    let mut fetcher = HttpFetcher::from_session_cookies(&cookies, &config)?;

    let report = run_mirror(&mut session, &mut fetcher, &config, mirror_root)?;

    println!("mirror complete");
    println!("root: {}", normalize_path(mirror_root));
    println!("pages_visited: {}", report.pages_visited);
    println!("duplicate_stubs: {}", report.duplicate_stubs);
    println!("skipped_links: {}", report.skipped_links);
    println!("not_found_recoveries: {}", report.not_found_recoveries);
    println!("log: {}", normalize_path(&mirror_root.join(LOG_FILE_NAME)));
    println!(
        "manifest: {}",
        normalize_path(&mirror_root.join(MANIFEST_FILE_NAME))
    );
    Ok(())
}

#[cfg(not(feature = "browser"))]
fn run_mirror_command(_config: MirrorConfig, _mirror_root: &Path, _args: MirrorArgs) -> Result<()> {
    bail!("`mirror` needs a browser-capable build; rebuild with `--features browser`")
}

fn run_verify(mirror_root: &Path) -> Result<()> {
    let report = verify_mirror(mirror_root)?;
    println!("verify");
    println!("root: {}", normalize_path(mirror_root));
    println!("scanned_pages: {}", report.scanned_pages);
    println!("checked_links: {}", report.checked_links);
    println!("dangling: {}", report.dangling.len());
    for link in &report.dangling {
        println!("dangling.link: {} -> {}", normalize_path(&link.page), link.href);
    }
    if !report.is_clean() {
        bail!("mirror has {} dangling relative links", report.dangling.len());
    }
    Ok(())
}

fn run_status(config: &MirrorConfig, mirror_root: &Path) -> Result<()> {
    println!("status");
    println!("root: {}", normalize_path(mirror_root));
    println!("root_exists: {}", format_flag(mirror_root.exists()));
    match config.root_url() {
        Ok(url) => println!("entry_url: {url}"),
        Err(_) => println!("entry_url: <unconfigured>"),
    }
    println!(
        "excluded_urls: {}",
        config.site.excluded_urls.len()
    );
    let log_path = mirror_root.join(LOG_FILE_NAME);
    println!("log_exists: {}", format_flag(log_path.exists()));
    let manifest_path = mirror_root.join(MANIFEST_FILE_NAME);
    println!("manifest_exists: {}", format_flag(manifest_path.exists()));
    if manifest_path.exists() {
        let visited = read_manifest(mirror_root)?;
        println!("manifest.pages: {}", visited.len());
        if let Some(last) = visited.last() {
            println!("manifest.last_page: {}", last.page_name);
        }
    }
    Ok(())
}

fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
