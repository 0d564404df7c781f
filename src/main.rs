use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Instant;

use sports_tally::cache::CacheManager;
use sports_tally::scoring::validate_scoring;
use sports_tally::store::{Store, StoreLock};
use sports_tally::tally::{tally, RunContext, RunOptions};
use sports_tally::Error;

const EXIT_SUCCESS: i32 = 0;
const EXIT_LOCK: i32 = 1;
const EXIT_DATA: i32 = 2;
const EXIT_CONFIG: i32 = 4;

#[derive(Subcommand, Debug)]
enum Commands {
    /// Tally every event into per-league standings (default if no subcommand)
    Tally,
    /// Delete all cached event payloads
    ClearCache,
}

#[derive(Parser, Debug)]
#[command(name = "sports-tally")]
#[command(about = "Aggregate per-event results into per-league standings", long_about = None)]
#[command(version)]
struct Cli {
    /// Store root (contains athletes/, leagues/, results/)
    store: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Skip cache reads (fresh entries are still written)
    #[arg(long, global = true)]
    no_cache: bool,

    /// Skip events that fail to tally instead of aborting
    #[arg(long, global = true)]
    keep_going: bool,

    /// Report _debug_points mismatches on stderr
    #[arg(long, global = true)]
    debug_points: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

fn main() {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Tally);
    let start_time = Instant::now();

    let store = match Store::open(&cli.store) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Store error: {}", e);
            std::process::exit(EXIT_DATA);
        }
    };

    if let Commands::ClearCache = command {
        let cache = match CacheManager::new(&store, true) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Cache error: {}", e);
                std::process::exit(EXIT_DATA);
            }
        };
        match cache.clear() {
            Ok(removed) => {
                println!("Removed {} cache entries", removed);
                std::process::exit(EXIT_SUCCESS);
            }
            Err(e) => {
                eprintln!("Cache error: {}", e);
                std::process::exit(EXIT_DATA);
            }
        }
    }

    // Validate every league's scoring configs before taking the lock.
    let unlocked = RunContext::new(&store, None);
    let leagues = match unlocked.leagues() {
        Ok(leagues) => leagues,
        Err(e) => {
            eprintln!("League error: {}", e);
            std::process::exit(EXIT_DATA);
        }
    };
    let mut config_ok = true;
    for league in leagues.iter() {
        for (event_type, config) in &league.def.scoring {
            if let Err(errors) = validate_scoring(config) {
                config_ok = false;
                eprintln!("Scoring config errors in {} ({}):", league.id, event_type);
                for error in errors {
                    eprintln!("  - {}", error);
                }
            }
        }
    }
    if !config_ok {
        std::process::exit(EXIT_CONFIG);
    }
    if cli.verbose {
        eprintln!("Loaded {} leagues from store", leagues.len());
        for league in leagues.iter() {
            eprintln!(
                "  {}: {} scoring entries, {} eligibility rules",
                league.id,
                league.def.scoring.len(),
                league.def.eligibility.len()
            );
        }
    }
    drop(unlocked);

    let lock = StoreLock::new(store.root());
    if let Err(e) = lock.acquire() {
        eprintln!("Lock error: {}", e);
        std::process::exit(EXIT_LOCK);
    }
    if cli.verbose {
        eprintln!("Acquired store lock at {}", lock.lock_file().display());
    }

    let ctx = RunContext::new(&store, Some(&lock));
    let opts = RunOptions {
        keep_going: cli.keep_going,
        debug_points: cli.debug_points,
        verbose: cli.verbose,
        use_cache: !cli.no_cache,
    };

    let board = tally(&ctx, &opts);
    if let Err(e) = lock.release() {
        eprintln!("Warning: failed to release lock: {}", e);
    }

    let board = match board {
        Ok(board) => board,
        Err(e @ Error::LockLost { .. }) => {
            eprintln!("Tally aborted: {}", e);
            std::process::exit(EXIT_LOCK);
        }
        Err(e) => {
            eprintln!("Tally error: {}", e);
            std::process::exit(EXIT_DATA);
        }
    };

    match sports_tally::output::render_board(&board) {
        Ok(text) => print!("{}", text),
        Err(e) => {
            eprintln!("Output error: {}", e);
            std::process::exit(EXIT_DATA);
        }
    }

    if cli.verbose {
        let entities: usize = board.values().map(|league| league.len()).sum();
        eprintln!();
        eprintln!(
            "Tallied {} leagues, {} entities in {:?}",
            board.len(),
            entities,
            start_time.elapsed()
        );
    }

    std::process::exit(EXIT_SUCCESS);
}
