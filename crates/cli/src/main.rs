// ABOUTME: Command-line front end for pagewatch: run the daily scheduler, scan now, manage sites.
// ABOUTME: Configuration comes from the environment (and .env); --data-dir overrides the state location.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local};
use clap::{Parser, Subcommand};
use pagewatch_core::{
    notifier_from_settings, AppConfig, ChangeRecord, Fetcher, Fingerprint, Monitor, Notifier,
    Scheduler, SiteRegistry, SiteStatusView, SmtpNotifier, SnapshotStatus, StateStore,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const RECENT_LIMIT: usize = 10;
const SHUTDOWN_POLL: Duration = Duration::from_millis(250);

/// Watch web pages for content changes and email a daily digest.
#[derive(Parser, Debug)]
#[command(name = "pagewatch")]
#[command(about = "Watch web pages for content changes", long_about = None)]
struct Args {
    /// Directory holding config.json, snapshots.json and metadata.json.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a startup check, then scan once a day until stopped.
    Serve,
    /// Scan every site now and send a digest if anything changed.
    Check {
        /// Print the scan summary as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Manage monitored sites.
    #[command(subcommand)]
    Sites(SitesCommand),
    /// Show the last scan and the next scheduled one.
    Status,
    /// Check email settings and list recent changes and errors.
    Doctor {
        /// Send a test digest email.
        #[arg(long, default_value_t = false)]
        send_test: bool,
    },
}

#[derive(Subcommand, Debug)]
enum SitesCommand {
    /// List sites with their latest status.
    List {
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Add a site. A bare host gets https://.
    Add {
        url: String,
        #[arg(long)]
        category: Option<String>,
        /// CSS selector limiting which part of the page is compared.
        #[arg(long)]
        selector: Option<String>,
    },
    /// Remove the site at INDEX.
    Remove { index: usize },
    /// Change a site's category.
    Category { index: usize, category: String },
    /// Set a site's title and stop scans from overwriting it.
    Title { index: usize, title: String },
    /// Let scans update the title again.
    UnlockTitle { index: usize },
    /// Set the CSS selector, or clear it when omitted.
    Selector { index: usize, selector: Option<String> },
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let mut config = AppConfig::from_env().context("invalid configuration")?;
    if let Some(dir) = args.data_dir {
        config.data_dir = dir;
    }

    let store = StateStore::open(&config.data_dir)
        .with_context(|| format!("cannot open data directory {}", config.data_dir.display()))?;

    match args.command {
        Command::Serve => serve(&config, store),
        Command::Check { json } => check(&config, store, json),
        Command::Sites(cmd) => sites(SiteRegistry::new(store), cmd),
        Command::Status => status(&config, &store),
        Command::Doctor { send_test } => doctor(&config, &store, send_test),
    }
}

fn build_monitor(config: &AppConfig, store: StateStore) -> Result<Monitor> {
    let fetcher = Fetcher::new(config.fetch.clone()).context("failed to build HTTP client")?;
    let notifier = notifier_from_settings(&config.smtp).context("invalid email settings")?;
    Ok(Monitor::new(store, Box::new(fetcher), notifier))
}

fn serve(config: &AppConfig, store: StateStore) -> Result<()> {
    let monitor = build_monitor(config, store)?;
    tracing::info!(
        data_dir = %config.data_dir.display(),
        at = %config.schedule.at,
        "pagewatch starting"
    );

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();
    ctrlc::set_handler(move || {
        tracing::info!("shutdown requested");
        flag.store(true, Ordering::SeqCst);
    })
    .context("failed to install signal handler")?;

    let mut scheduler = Scheduler::new(&monitor, config.schedule)
        .with_clock(Local::now, |step| sleep_unless_stopped(&shutdown, step));
    scheduler.run(&shutdown);
    Ok(())
}

/// Sleeps for `step`, returning early once `shutdown` is set.
fn sleep_unless_stopped(shutdown: &AtomicBool, step: Duration) {
    let deadline = Instant::now() + step;
    while !shutdown.load(Ordering::SeqCst) {
        let left = deadline.saturating_duration_since(Instant::now());
        if left.is_zero() {
            break;
        }
        thread::sleep(left.min(SHUTDOWN_POLL));
    }
}

fn check(config: &AppConfig, store: StateStore, json: bool) -> Result<()> {
    let monitor = build_monitor(config, store)?;
    let summary = monitor.check_now()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("{}", summary.message);
    for change in &summary.changes {
        println!("  [{}] {}", change.category, change.url);
    }
    if summary.errors > 0 {
        println!(
            "{} of {} site(s) could not be fetched; see `pagewatch sites list`.",
            summary.errors, summary.checked
        );
    }
    Ok(())
}

fn sites(registry: SiteRegistry, cmd: SitesCommand) -> Result<()> {
    match cmd {
        SitesCommand::List { json } => {
            let views = registry.list()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&views)?);
            } else if views.is_empty() {
                println!("No sites configured. Add one with `pagewatch sites add <url>`.");
            } else {
                for view in &views {
                    print_site(view);
                }
            }
        }
        SitesCommand::Add {
            url,
            category,
            selector,
        } => {
            let site = registry.add(&url, category.as_deref(), selector.as_deref())?;
            println!("Added {} [{}]", site.url, site.category);
        }
        SitesCommand::Remove { index } => {
            let site = registry.remove(index)?;
            println!("Removed {}", site.url);
        }
        SitesCommand::Category { index, category } => {
            let site = registry.update_category(index, &category)?;
            println!("{} is now in [{}]", site.url, site.category);
        }
        SitesCommand::Title { index, title } => {
            let site = registry.update_title(index, &title)?;
            println!("{} is now titled {:?} (locked)", site.url, title.trim());
        }
        SitesCommand::UnlockTitle { index } => {
            let site = registry.unlock_title(index)?;
            println!("{} title will update on the next scan", site.url);
        }
        SitesCommand::Selector { index, selector } => {
            let site = registry.update_selector(index, selector.as_deref())?;
            match &site.selector {
                Some(sel) => println!("{} now compares {}", site.url, sel),
                None => println!("{} now compares the whole page", site.url),
            }
        }
    }
    Ok(())
}

fn print_site(view: &SiteStatusView) {
    let site = &view.site;
    println!("{:>3}  {:<9}  [{}] {}", view.index, view.status, site.category, site.url);
    if let Some(title) = &site.title {
        let lock = if site.title_locked { " (locked)" } else { "" };
        println!("       title: {}{}", title, lock);
    }
    if let Some(selector) = &site.selector {
        println!("       selector: {}", selector);
    }
    if let Some(at) = view.last_check {
        println!("       checked: {}", at.format(TIME_FORMAT));
    }
    if let Some(at) = view.last_changed {
        println!("       changed: {}", at.format(TIME_FORMAT));
    }
    if let Some(err) = &view.error {
        println!("       error: {}", err);
    }
}

fn format_time(at: Option<DateTime<Local>>) -> String {
    at.map(|t| t.format(TIME_FORMAT).to_string())
        .unwrap_or_else(|| "never".to_string())
}

fn status(config: &AppConfig, store: &StateStore) -> Result<()> {
    let meta = store.load_metadata()?;
    let now = Local::now();
    let sites = store.load_sites()?;

    println!("Data directory: {}", config.data_dir.display());
    println!("Sites: {}", sites.sites.len());
    println!("Last scan: {}", format_time(meta.last_check_time));
    println!(
        "Next scheduled scan: {}",
        config.schedule.next_fire_after(now).format(TIME_FORMAT)
    );
    println!(
        "Startup scan on launch: {}",
        if config.schedule.startup_scan_due(&meta, now) {
            "yes"
        } else {
            "no"
        }
    );
    Ok(())
}

fn doctor(config: &AppConfig, store: &StateStore, send_test: bool) -> Result<()> {
    let smtp = &config.smtp;
    println!("Email configuration");
    println!("  server:   {}:{}", smtp.server, smtp.port);
    println!("  username: {}", display_or_unset(&smtp.username));
    println!(
        "  password: {}",
        if smtp.password.is_empty() { "(not set)" } else { "(set)" }
    );
    println!("  from:     {}", display_or_unset(&smtp.from));
    println!("  to:       {}", display_or_unset(&smtp.to));

    let missing = smtp.missing();
    if missing.is_empty() {
        println!("  ok: all email settings present");
    } else {
        println!("  missing: {}", missing.join(", "));
    }

    let sites = store.load_sites()?;
    let snapshots = store.load_snapshots()?;
    let mut recent: Vec<_> = snapshots
        .iter()
        .filter(|(_, s)| matches!(s.status, SnapshotStatus::Changed | SnapshotStatus::Error))
        .collect();
    recent.sort_by(|a, b| b.1.last_check.cmp(&a.1.last_check));

    println!();
    println!("Monitored sites: {}", sites.sites.len());
    if recent.is_empty() {
        println!("No recent changes or errors.");
        if snapshots.is_empty() {
            println!("  No scan has run yet; try `pagewatch check`.");
        }
    } else {
        println!("Recent changes and errors:");
        for (url, snapshot) in recent.into_iter().take(RECENT_LIMIT) {
            println!(
                "  {:<9} {}  {}",
                snapshot.status,
                snapshot.last_check.format(TIME_FORMAT),
                url
            );
            if let Some(err) = &snapshot.error {
                println!("            {}", err);
            }
        }
    }

    if send_test {
        if !smtp.is_configured() {
            bail!("cannot send a test email: missing {}", missing.join(", "));
        }
        let notifier = SmtpNotifier::new(smtp.clone())?;
        let now = Local::now();
        let test_change = ChangeRecord {
            url: "https://example.com".to_string(),
            category: "Test".to_string(),
            title: Some("Test notification".to_string()),
            previous_fingerprint: None,
            new_fingerprint: Fingerprint::of(&now.to_rfc3339()),
            detected_at: now,
        };
        println!();
        println!("Sending test email to {}...", smtp.to);
        notifier
            .notify(&[test_change])
            .context("test email failed")?;
        println!("Test email sent. Check your inbox.");
    }
    Ok(())
}

fn display_or_unset(value: &str) -> &str {
    if value.is_empty() {
        "(not set)"
    } else {
        value
    }
}
