//! Concurrent CFR training binary.
//!
//! Usage:
//!   cargo run --release --bin cfr-train -- [OPTIONS]
//!
//! With `--seconds` the run is time-boxed; with `--ci` it trains
//! sequentially until the convergence indicator drops below the target.
//! Otherwise the binary reads commands from stdin:
//!
//! ```text
//! run            start worker threads
//! stop           stop them and report failed workers
//! print          counters, synchronizer stats and (when stopped) strategies
//! save [FILE]    write a checkpoint (default: --save)
//! export [FILE]  write strategies as JSON (default: --export)
//! exit           stop, save, export and quit
//! ```

use std::error::Error;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use chance_cfr::cfr::{
    ConvergenceStats, Game, Solver, SynchronizerConfig, TrainerConfig, WorkerFailure,
};
use chance_cfr::games::kuhn::KuhnPoker;
use chance_cfr::games::pennies::MatchingPennies;
use clap::{Parser, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};

#[derive(Parser, Debug)]
#[command(name = "cfr-train")]
#[command(about = "Concurrent chance-sampled CFR training")]
struct Cli {
    /// Game to train
    #[arg(short, long, value_enum, default_value = "kuhn")]
    game: GameKind,

    /// Worker threads (default: all cores)
    #[arg(short, long)]
    threads: Option<usize>,

    /// Chance synchronization strategy (overrides --config)
    #[arg(long, value_enum)]
    strategy: Option<StrategyKind>,

    /// Buffered strategy: refill when this many samples or fewer are ready
    #[arg(long)]
    low_water: Option<usize>,

    /// Buffered strategy: buffer ceiling
    #[arg(long)]
    high_water: Option<usize>,

    /// Buffered strategy: candidates produced per refill pass
    #[arg(long)]
    batch: Option<usize>,

    /// Trainer configuration JSON file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Train concurrently for this many seconds, then exit
    #[arg(long, value_parser = parse_seconds)]
    seconds: Option<Duration>,

    /// Train sequentially until the convergence indicator reaches this value
    #[arg(long, conflicts_with = "seconds")]
    ci: Option<f64>,

    /// Iteration cap for --ci (0 = unlimited)
    #[arg(long, default_value_t = 0)]
    max_iterations: u64,

    /// Checkpoint to resume from
    #[arg(long)]
    load: Option<PathBuf>,

    /// Checkpoint written on exit and by `save`
    #[arg(long)]
    save: Option<PathBuf>,

    /// Strategy JSON written on exit and by `export`
    #[arg(long)]
    export: Option<PathBuf>,

    /// Random seed
    #[arg(short, long)]
    seed: Option<u64>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum GameKind {
    Kuhn,
    Pennies,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StrategyKind {
    Retry,
    Buffered,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    let config = trainer_config(&cli)?;

    println!("=================================================");
    println!("  Chance-sampled CFR trainer");
    println!("=================================================");
    println!("Game: {:?}", cli.game);
    println!("Threads: {}", config.worker_count());
    println!("Synchronizer: {:?}", config.synchronizer);
    if let Some(seed) = config.seed {
        println!("Seed: {}", seed);
    }
    println!();

    match cli.game {
        GameKind::Kuhn => session(Solver::new(KuhnPoker::new(), config)?, &cli),
        GameKind::Pennies => session(Solver::new(MatchingPennies::new(), config)?, &cli),
    }
}

fn parse_seconds(value: &str) -> Result<Duration, String> {
    let seconds: f64 = value
        .parse()
        .map_err(|e| format!("`{}` is not a number: {}", value, e))?;
    Duration::try_from_secs_f64(seconds).map_err(|e| format!("`{}`: {}", value, e))
}

fn trainer_config(cli: &Cli) -> Result<TrainerConfig, Box<dyn Error>> {
    let mut config = match &cli.config {
        Some(path) => TrainerConfig::from_json_file(path)?,
        None => TrainerConfig::default(),
    };
    match cli.strategy {
        Some(StrategyKind::Retry) => config.synchronizer = SynchronizerConfig::default(),
        Some(StrategyKind::Buffered) => config.synchronizer = SynchronizerConfig::buffered(),
        None => {}
    }
    if let SynchronizerConfig::Buffered {
        low_water,
        high_water,
        batch_size,
    } = &mut config.synchronizer
    {
        *low_water = cli.low_water.unwrap_or(*low_water);
        *high_water = cli.high_water.unwrap_or(*high_water);
        *batch_size = cli.batch.unwrap_or(*batch_size);
    } else if cli.low_water.is_some() || cli.high_water.is_some() || cli.batch.is_some() {
        log::warn!("watermark and batch flags only apply to --strategy buffered");
    }
    if cli.threads.is_some() {
        config.threads = cli.threads;
    }
    if cli.seed.is_some() {
        config.seed = cli.seed;
    }
    config.validate()?;
    Ok(config)
}

fn session<G: Game>(mut solver: Solver<G>, cli: &Cli) -> Result<(), Box<dyn Error>> {
    if let Some(path) = &cli.load {
        solver.load_from(path)?;
        println!(
            "Resumed {} at iteration {}",
            path.display(),
            solver.snapshot().iterations
        );
    }

    if let Some(duration) = cli.seconds {
        timed_run(&mut solver, duration)?;
    } else if let Some(target) = cli.ci {
        converge(&mut solver, target, cli.max_iterations)?;
    } else {
        interactive(&mut solver, cli)?;
    }

    if solver.is_running() {
        report(&solver.stop());
    }
    print_summary(&solver)?;
    if let Some(path) = &cli.save {
        solver.save_to(path)?;
        println!("Checkpoint saved to {}", path.display());
    }
    if let Some(path) = &cli.export {
        solver.write_strategies(path)?;
        println!("Strategies exported to {}", path.display());
    }
    Ok(())
}

fn timed_run<G: Game>(solver: &mut Solver<G>, duration: Duration) -> Result<(), Box<dyn Error>> {
    let pb = ProgressBar::new(duration.as_millis() as u64);
    pb.set_style(
        ProgressStyle::with_template(
            "  [{elapsed_precise}] [{bar:40.cyan/blue}] {percent}% {msg}",
        )?
        .progress_chars("#>-"),
    );
    let start = Instant::now();
    let failures = solver.train_for_with_callback(duration, Duration::from_millis(100), |snapshot| {
        let elapsed = start.elapsed();
        pb.set_position(elapsed.as_millis() as u64);
        pb.set_message(format!(
            "{} it ({:.0} it/s)",
            snapshot.iterations,
            snapshot.iterations as f64 / elapsed.as_secs_f64().max(1e-9)
        ));
    })?;
    pb.finish_and_clear();
    report(&failures);
    Ok(())
}

fn converge<G: Game>(
    solver: &mut Solver<G>,
    target: f64,
    max_iterations: u64,
) -> Result<(), Box<dyn Error>> {
    println!("Target CI: {} (Convergence Indicator)", target);
    println!("  CI < 10: bare minimum");
    println!("  CI ~ 1 : fully converged");
    let result = solver.train_until_converged(
        target,
        1_000,
        max_iterations,
        Some(|stats: &ConvergenceStats| {
            println!(
                "Iteration {:>8} | CI: {:>6.2} | Info sets: {:>8} | Speed: {:>6.0} it/s | Elapsed: {:>6.1}s",
                stats.iteration,
                stats.ci,
                stats.info_sets,
                stats.iterations_per_second,
                stats.elapsed_seconds
            );
        }),
    )?;
    println!();
    if result.converged {
        println!("Converged! Final CI: {:.2} (target: {:.2})", result.final_ci, target);
    } else {
        println!(
            "Stopped at max iterations. Final CI: {:.2} (target: {:.2})",
            result.final_ci, target
        );
    }
    Ok(())
}

fn interactive<G: Game>(solver: &mut Solver<G>, cli: &Cli) -> Result<(), Box<dyn Error>> {
    println!("Commands: run, stop, print, save [FILE], export [FILE], exit");
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("> ");
        io::stdout().flush()?;
        let Some(line) = lines.next() else { break };
        let line = line?;
        let mut words = line.split_whitespace();
        let command = words.next().unwrap_or("");
        let target = words.next().map(PathBuf::from);

        let outcome = match command {
            "" => Ok(()),
            "run" => solver.start().map(|()| println!("Training started")),
            "stop" => {
                if solver.is_running() {
                    report(&solver.stop());
                    println!("Training stopped at iteration {}", solver.snapshot().iterations);
                } else {
                    println!("Not running");
                }
                Ok(())
            }
            "print" => {
                print_progress(solver);
                if !solver.is_running() {
                    print_summary(solver)?;
                }
                Ok(())
            }
            "save" => match target.as_ref().or(cli.save.as_ref()) {
                Some(path) => solver
                    .save_to(path)
                    .map(|()| println!("Checkpoint saved to {}", path.display())),
                None => {
                    println!("No checkpoint path: use `save FILE` or --save");
                    Ok(())
                }
            },
            "export" => match target.as_ref().or(cli.export.as_ref()) {
                Some(path) => solver
                    .write_strategies(path)
                    .map(|()| println!("Strategies exported to {}", path.display())),
                None => {
                    println!("No export path: use `export FILE` or --export");
                    Ok(())
                }
            },
            "exit" | "quit" => break,
            other => {
                println!("Unknown command: {}", other);
                Ok(())
            }
        };
        if let Err(e) = outcome {
            println!("Error: {}", e);
        }
    }
    Ok(())
}

fn print_progress<G: Game>(solver: &Solver<G>) {
    let snapshot = solver.snapshot();
    let sync = solver.sync_stats();
    println!("Iterations: {}", snapshot.iterations);
    println!("Average sampled utility: {:?}", snapshot.average_utility());
    println!(
        "Synchronizer: {} in flight, {} reserved, {} buffered, {} parked, {} collisions / {} produced",
        sync.in_flight, sync.reserved, sync.buffered, sync.parked, sync.collisions, sync.produced
    );
}

fn print_summary<G: Game>(solver: &Solver<G>) -> Result<(), Box<dyn Error>> {
    let stats = solver.stats();
    println!();
    println!("Total iterations: {}", stats.iterations);
    println!("Info sets: {}", stats.info_sets);
    println!("Training time: {:.2}s", stats.elapsed_seconds);
    println!("Average speed: {:.0} iterations/second", stats.iterations_per_second);
    if let Some(value) = solver.evaluate()? {
        println!("Game value under average strategies: {:?}", value);
    }

    println!();
    println!("=== Average Strategies ===");
    let export = solver.export_strategies()?;
    for record in &export.info_sets {
        let actions: Vec<String> = record
            .actions
            .iter()
            .zip(&record.strategy)
            .map(|(action, p)| format!("{}: {:.1}%", action, p * 100.0))
            .collect();
        println!("  {:<10} {}", record.label, actions.join("  "));
    }
    println!();
    Ok(())
}

fn report(failures: &[WorkerFailure]) {
    for failure in failures {
        eprintln!("Worker {} failed: {}", failure.worker, failure.message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seconds_must_be_finite_and_non_negative() {
        assert_eq!(parse_seconds("1.5"), Ok(Duration::from_millis(1_500)));
        assert_eq!(parse_seconds("0"), Ok(Duration::ZERO));
        for bad in ["inf", "NaN", "-1", "soon"] {
            assert!(parse_seconds(bad).is_err(), "{} accepted", bad);
        }

        assert!(Cli::try_parse_from(["cfr-train", "--seconds", "inf"]).is_err());
        let cli = Cli::try_parse_from(["cfr-train", "--seconds", "2", "--game", "pennies"]).unwrap();
        assert_eq!(cli.seconds, Some(Duration::from_secs(2)));
    }
}
