//! Disk-based strong solve driver.
//!
//! Opens (or resumes) a solve database, optionally imports a legacy
//! checkpoint, and runs the retrograde pipeline to completion.

use bobail::board::State;
use bobail::game::Bobail;
use bobail::movegen::Rules;
use bobail::solver::store::RocksStore;
use bobail::solver::Outcome;
use bobail::{env_config, Solver};

struct Args {
    db_path: String,
    import_file: Option<String>,
    checkpoint_interval: u64,
    num_threads: usize,
    rules: Rules,
    verify: bool,
}

fn print_usage(prog: &str) {
    eprintln!(
        "Usage: {} [options]\n\
         Options:\n\
           --db PATH       Database directory (required)\n\
           --import FILE   Import a legacy checkpoint file first\n\
           --interval N    Checkpoint every N states (default: 1000000)\n\
           --threads N     Worker threads (default: BOBAIL_NUM_THREADS or 8)\n\
           --official      Official rules: pawns slide max distance [default]\n\
           --flexible      Flexible rules: pawns may stop anywhere\n\
           --verify        Audit the database after the solve completes\n\
           --help          Show this help",
        prog
    );
}

fn parse_args() -> Args {
    let argv: Vec<String> = std::env::args().collect();
    let mut args = Args {
        db_path: String::new(),
        import_file: None,
        checkpoint_interval: 1_000_000,
        num_threads: env_config::num_threads(),
        rules: Rules::Official,
        verify: false,
    };

    let mut i = 1;
    while i < argv.len() {
        match argv[i].as_str() {
            "--help" | "-h" => {
                print_usage(&argv[0]);
                std::process::exit(0);
            }
            "--db" => {
                i += 1;
                match argv.get(i) {
                    Some(p) => args.db_path = p.clone(),
                    None => {
                        eprintln!("Error: --db requires a path");
                        std::process::exit(1);
                    }
                }
            }
            "--import" => {
                i += 1;
                match argv.get(i) {
                    Some(f) => args.import_file = Some(f.clone()),
                    None => {
                        eprintln!("Error: --import requires a filename");
                        std::process::exit(1);
                    }
                }
            }
            "--interval" => {
                i += 1;
                args.checkpoint_interval = argv
                    .get(i)
                    .and_then(|s| s.parse().ok())
                    .unwrap_or_else(|| {
                        eprintln!("Error: --interval requires a number");
                        std::process::exit(1);
                    });
            }
            "--threads" => {
                i += 1;
                args.num_threads = argv
                    .get(i)
                    .and_then(|s| s.parse().ok())
                    .filter(|&n| n >= 1)
                    .unwrap_or_else(|| {
                        eprintln!("Error: --threads requires a positive number");
                        std::process::exit(1);
                    });
            }
            "--official" => args.rules = Rules::Official,
            "--flexible" => args.rules = Rules::Flexible,
            "--verify" => args.verify = true,
            other => {
                eprintln!("Unknown option: {}", other);
                print_usage(&argv[0]);
                std::process::exit(1);
            }
        }
        i += 1;
    }

    if args.db_path.is_empty() {
        eprintln!("Error: --db is required");
        print_usage(&argv[0]);
        std::process::exit(1);
    }
    args
}

fn main() {
    let args = parse_args();
    env_config::init_rayon_threads(args.num_threads);

    println!("Bobail Strong Solver (disk-based retrograde analysis)");
    println!("=====================================================");
    println!(
        "Rules variant: {}",
        match args.rules {
            Rules::Official => "OFFICIAL (pawns slide max distance)",
            Rules::Flexible => "FLEXIBLE (pawns may stop anywhere)",
        }
    );
    println!();
    println!("Starting position:");
    println!("{}", State::starting_position());

    println!("Opening database: {}", args.db_path);
    let store = match RocksStore::open(&args.db_path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Failed to open database: {}", e);
            std::process::exit(1);
        }
    };
    let mut solver = match Solver::open(Bobail::new(args.rules), store) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Failed to load solver metadata: {}", e);
            std::process::exit(1);
        }
    };
    solver.set_num_threads(args.num_threads);
    solver.set_checkpoint_interval(args.checkpoint_interval);
    solver.set_progress_callback(|label, current, total| {
        if total > 0 {
            let pct = current as f64 / total as f64 * 100.0;
            print!("\r{}: {} / {} ({:.1}%)      ", label, current, total, pct);
        } else {
            print!("\r{}: {}      ", label, current);
        }
        use std::io::Write;
        let _ = std::io::stdout().flush();
    });

    if let Some(file) = &args.import_file {
        println!("Importing checkpoint: {}", file);
        if let Err(e) = solver.import_checkpoint(file) {
            eprintln!("Import failed: {}", e);
            std::process::exit(1);
        }
    }

    println!(
        "Current phase: {:?}, {} states in database, {} threads",
        solver.current_phase(),
        solver.num_states(),
        args.num_threads
    );
    println!();

    let started = std::time::Instant::now();
    match solver.solve() {
        Ok(Outcome::Completed) => {
            println!();
            println!("Solve complete in {:.1}s", started.elapsed().as_secs_f64());
            println!("  States: {}", solver.num_states());
            println!("  Wins:   {}", solver.num_wins());
            println!("  Losses: {}", solver.num_losses());
            println!("  Draws:  {}", solver.num_draws());
            match solver.starting_result() {
                Ok(value) => println!("  Starting position: {:?}", value),
                Err(e) => eprintln!("  Starting position lookup failed: {}", e),
            }

            if args.verify {
                println!();
                println!("Auditing database...");
                let audits = [
                    ("registry", solver.verify_registry()),
                    ("predecessors", solver.verify_predecessors()),
                    ("results", solver.verify_results()),
                ];
                let mut dirty = false;
                for (name, report) in audits {
                    match report {
                        Ok(report) if report.is_clean() => {
                            println!("  {}: ok ({} states)", name, report.states_checked);
                        }
                        Ok(report) => {
                            dirty = true;
                            println!("  {}: {} issue(s)", name, report.issue_count);
                            for issue in &report.issues {
                                println!("    {}", issue);
                            }
                        }
                        Err(e) => {
                            eprintln!("  {}: audit failed: {}", name, e);
                            std::process::exit(1);
                        }
                    }
                }
                if dirty {
                    std::process::exit(1);
                }
            }
        }
        Ok(Outcome::Cancelled) => {
            println!();
            println!("Cancelled; checkpoint saved. Re-run to resume.");
        }
        Err(e) => {
            eprintln!();
            eprintln!("Solve failed: {}", e);
            std::process::exit(1);
        }
    }
}
