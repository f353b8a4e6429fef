use chrono::Utc;
use clap::{Parser, Subcommand};
use manga_sync::cipher::Selection;
use manga_sync::commands::{self, Workspace};
use manga_sync::{config, logging, output, reset};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use tracing::debug;

#[derive(Parser)]
#[command(name = "manga-sync")]
#[command(about = "Catalog, view-counter and manifest automation for static manga sites")]
#[command(long_about = "\
Catalog, view-counter and manifest automation for static manga sites

The site directory is the data source. Numbered folders are chapters, the
images inside them are pages, and JSON files hold the state the site reads.

Site structure:

  site/
  ├── manga-config.json            # Series metadata + lockedChapters (required)
  ├── automation.toml              # Thresholds, paths, locking (optional)
  ├── manga.json                   # Catalog (generated)
  ├── chapters.json                # Public feed, newest first (generated)
  ├── pending-views.json           # Series views waiting to be flushed
  ├── pending-chapter-views.json   # Chapter views waiting to be flushed
  ├── 1/                           # Chapter 1
  │   ├── manifest.json            # Page URLs (encrypted by `encrypt`)
  │   └── 001.jpg
  └── 2.1/                         # Extra chapter between 2 and 3

Locked chapters (listed in lockedChapters) are announced in the catalog
without pages. They unlock as soon as their folder appears.

Typical CI order: generate, sync, flush-series, flush-chapters, encrypt.

Run 'manga-sync gen-config' to print a documented automation.toml.")]
#[command(version)]
struct Cli {
    /// Site directory
    #[arg(long, default_value = ".", global = true)]
    root: PathBuf,

    /// Automation settings file, relative to --root
    #[arg(long, default_value = "automation.toml", global = true)]
    settings: PathBuf,

    /// Debug logging on stderr (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Regenerate manga.json from chapter folders, keeping views and dates
    Generate,
    /// Add pending counters for chapters that have none
    Sync,
    /// Flush pending series views into totalViews once the threshold is met
    FlushSeries,
    /// Flush pending chapter views into each chapter once the threshold is met
    FlushChapters,
    /// Rewrite chapters.json from manga.json
    Feed,
    /// Encrypt page URLs in chapter manifests
    Encrypt {
        /// Check every manifest instead of those changed in the last commit
        #[arg(long, conflicts_with = "paths")]
        all: bool,
        /// Specific manifests to encrypt, relative to --root
        paths: Vec<PathBuf>,
    },
    /// Reset every view counter to zero
    Reset {
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
    /// Print a stock automation.toml with all options documented
    GenConfig,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    logging::init(cli.verbose)?;
    debug!(root = %cli.root.display(), "parsed cli");

    let workspace = || Workspace::load(&cli.root, &cli.settings);
    let now = Utc::now();

    match cli.command {
        Command::Generate => {
            let report = commands::generate(&workspace()?, now)?;
            output::print_generate_output(&report);
        }
        Command::Sync => {
            let report = commands::sync(&workspace()?, now)?;
            output::print_sync_output(&report);
        }
        Command::FlushSeries => {
            let report = commands::flush_series(&workspace()?, now)?;
            output::print_flush_output("Series views", &report);
        }
        Command::FlushChapters => {
            let report = commands::flush_chapters(&workspace()?, now)?;
            output::print_flush_output("Chapter views", &report);
        }
        Command::Feed => {
            let report = commands::feed(&workspace()?)?;
            output::print_feed_output(&report);
        }
        Command::Encrypt { all, paths } => {
            let selection = if !paths.is_empty() {
                Selection::Paths(&paths)
            } else if all {
                Selection::All
            } else {
                Selection::Changed
            };
            let report = commands::encrypt(&workspace()?, selection)?;
            output::print_encrypt_output(&report);
        }
        Command::Reset { yes } => {
            if !yes && !confirm_reset()? {
                println!("Reset cancelled, nothing changed");
                return Ok(());
            }
            let report = commands::reset(&workspace()?, now)?;
            output::print_reset_output(&report);
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}

/// Show what a reset destroys and read the confirmation word from stdin.
fn confirm_reset() -> io::Result<bool> {
    for line in output::format_reset_warning() {
        println!("{}", line);
    }
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(reset::confirmed(&answer))
}
