use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use import_cost::{CostStream, ImportCost, RunArgs, SizeCache};
use import_cost_core::{CostError, Dialect, PackageCost, collect_sources};
use log::{debug, info, warn};
use serde::Serialize;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

#[derive(Parser)]
#[command(name = "import-cost")]
#[command(about = "Report the bundled size of every package import", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Size the package imports of files or directories
    Run(RunCommand),
    /// Delete the durable size cache
    ClearCache(RunArgs),
    /// Serve size requests on stdio (spawned by the worker pool)
    Worker,
}

#[derive(Debug, Args)]
struct RunCommand {
    /// Files or directories to scan
    #[arg(required = true)]
    paths: Vec<PathBuf>,

    /// Parse every file as this dialect instead of guessing from its extension
    #[arg(long)]
    dialect: Option<Dialect>,

    /// Print results as JSON
    #[arg(long)]
    json: bool,

    #[command(flatten)]
    options: RunArgs,
}

#[derive(Serialize)]
struct FileReport {
    file: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    costs: Option<Vec<PackageCost>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<CostError>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    debug!("Parsed CLI arguments: {:?}", cli.command);

    match cli.command {
        Commands::Run(cmd) => {
            let failed = run(cmd).await?;
            if failed {
                // Non-zero exit when a file could not be sized
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::ClearCache(args) => {
            let cache = SizeCache::new(args.cache_options());
            cache.clear()?;
            println!("Cleared {}", cache.cache_file().display());
            Ok(())
        }
        Commands::Worker => import_cost::serve(tokio::io::stdin(), tokio::io::stdout()).await,
    }
}

/// Returns whether any file failed as a whole.
async fn run(cmd: RunCommand) -> Result<bool> {
    // stdio is blocked by LineWriter, use a BufWriter to reduce syscalls.
    // See https://github.com/rust-lang/rust/issues/60673
    let mut stdout = BufWriter::new(std::io::stdout());
    let start = Instant::now();

    let mut files = Vec::new();
    for path in &cmd.paths {
        let path = std::path::absolute(path)
            .with_context(|| format!("Failed to resolve {}", path.display()))?;
        files.extend(collect_sources(&path)?);
    }
    info!("Sizing imports in {} files", files.len());

    let cache = Arc::new(SizeCache::new(cmd.options.cache_options()));
    let runner = ImportCost::new(Arc::clone(&cache));
    let config = cmd.options.cost_config();

    let mut runs: Vec<(PathBuf, CostStream)> = Vec::new();
    for file in files {
        let text = match std::fs::read_to_string(&file) {
            Ok(text) => text,
            Err(e) => {
                warn!("Skipping {}: {}", file.display(), e);
                continue;
            }
        };
        let dialect = cmd.dialect.or_else(|| Dialect::from_path(&file));
        runs.push((file.clone(), runner.run(file, text, dialect, config.clone())));
    }

    let mut reports = Vec::new();
    let mut failed = false;
    let mut imports = 0;
    for (file, stream) in runs {
        match stream.finish().await {
            Ok(costs) => {
                imports += costs.len();
                reports.push(FileReport { file, costs: Some(costs), error: None });
            }
            Err(err) if err.is_debounce() => debug!("Skipping superseded run for {}", file.display()),
            Err(err) => {
                failed = true;
                reports.push(FileReport { file, costs: None, error: Some(err) });
            }
        }
    }
    cache.cleanup().await;

    if cmd.json {
        serde_json::to_writer_pretty(&mut stdout, &reports)?;
        writeln!(stdout)?;
    } else {
        for report in &reports {
            match (&report.costs, &report.error) {
                (Some(costs), _) => import_cost::print_costs(&mut stdout, &report.file, costs)?,
                (None, Some(err)) => writeln!(
                    stdout,
                    "{}\n{}  {}",
                    report.file.display().to_string().bright_white().bold(),
                    "└──".dimmed(),
                    err.to_string().red()
                )?,
                (None, None) => {}
            }
        }
        writeln!(
            stdout,
            "\n{} Finished in {}ms on {} imports in {} files.",
            "●".bright_blue(),
            start.elapsed().as_millis().to_string().cyan(),
            imports.to_string().cyan(),
            reports.len().to_string().cyan()
        )?;
    }
    stdout.flush()?;
    Ok(failed)
}
