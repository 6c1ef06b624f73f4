//! Evolve - repeated-interaction game runner
//!
//! ## Commands
//!
//! - `single`: play every dataset item as a single-agent rule-compliance game
//! - `cooperative`: play one dataset item as an n-agent cooperative game
//! - `sweep`: play every item over a grid of thresholds and reward sets
//! - `schedule`: print the supervision schedule of a pattern

mod output;
mod settings;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, Level};

use evolve_core::report::{run_all, CellReport, SingleReport, SweepGrid};
use evolve_core::{
    cooperative_config, load_items, rule_compliance_config, supervision_for_round, AgentGateway,
    ConfigOverrides, Orchestrator, PeerVisibility, SupervisionPattern, WorkerPool,
};

use output::{timestamp, ResultsDir};
use settings::RunSettings;

#[derive(Parser)]
#[command(name = "evolve")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Repeated-interaction game simulation for LLM agents", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Run settings file (TOML)
    #[arg(short, long, global = true, env = "EVOLVE_CONFIG")]
    config: Option<PathBuf>,

    /// Dataset file, overriding the settings
    #[arg(long, global = true)]
    dataset: Option<PathBuf>,

    /// Results directory, overriding the settings
    #[arg(long, global = true)]
    results_dir: Option<PathBuf>,

    /// Rounds per environment, overriding the settings
    #[arg(short, long, global = true)]
    rounds: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Play every dataset item as a single-agent game
    Single {
        /// Supervision pattern (e.g. alternating, all_unsupervised)
        #[arg(long)]
        pattern: Option<String>,

        /// Rounds of history shown to the agent
        #[arg(long)]
        history_window: Option<usize>,
    },

    /// Play one dataset item as a cooperative game
    Cooperative {
        /// Index of the dataset item
        #[arg(long, default_value = "0")]
        item: usize,

        /// Number of agents
        #[arg(short = 'n', long)]
        agents: Option<usize>,

        /// Threshold: a ratio up to 1.0, an absolute count above
        #[arg(long)]
        threshold: Option<f64>,

        /// Show peers only their parsed decisions
        #[arg(long)]
        final_only: bool,
    },

    /// Play every item over the thresholds x reward sets grid
    Sweep {
        /// Number of agents, overriding the settings
        #[arg(short = 'n', long)]
        agents: Option<usize>,
    },

    /// Print the supervision schedule of a pattern
    Schedule {
        pattern: String,

        #[arg(long, default_value = "0")]
        seed: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    evolve_core::init_tracing(cli.json, level);

    let mut settings = RunSettings::load(cli.config.as_deref())?;
    if let Some(dataset) = cli.dataset {
        settings.dataset_path = dataset;
    }
    if let Some(results_dir) = cli.results_dir {
        settings.results_dir = results_dir;
    }
    if let Some(rounds) = cli.rounds {
        settings.max_rounds = rounds;
    }

    match cli.command {
        Commands::Single {
            pattern,
            history_window,
        } => {
            if let Some(pattern) = pattern {
                settings.supervision_pattern = SupervisionPattern::from_name(&pattern);
            }
            if history_window.is_some() {
                settings.history_window = history_window;
            }
            cmd_single(&settings).await
        }
        Commands::Cooperative {
            item,
            agents,
            threshold,
            final_only,
        } => {
            if let Some(n) = agents {
                settings.num_agents = n;
            }
            if final_only {
                settings.peer_visibility = PeerVisibility::FinalOnly;
            }
            cmd_cooperative(&settings, item, threshold).await
        }
        Commands::Sweep { agents } => {
            if let Some(n) = agents {
                settings.num_agents = n;
            }
            cmd_sweep(&settings).await
        }
        Commands::Schedule { pattern, seed } => {
            cmd_schedule(&pattern, settings.max_rounds, seed);
            Ok(())
        }
    }
}

async fn cmd_single(settings: &RunSettings) -> Result<()> {
    let items = load_items(&settings.dataset_path)
        .with_context(|| format!("load dataset {}", settings.dataset_path.display()))?;
    let overrides = ConfigOverrides {
        max_rounds: Some(settings.max_rounds),
        history_window: settings.history_window,
        supervision_pattern: Some(settings.supervision_pattern),
        ..ConfigOverrides::default()
    };
    let configs = items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            rule_compliance_config(item, &overrides).with_context(|| format!("dataset item {i}"))
        })
        .collect::<Result<Vec<_>>>()?;

    let agent = settings
        .backend
        .factory()?
        .build(None)
        .context("build agent backend")?;
    let gateway = AgentGateway::new(agent).with_retry(settings.pool.retry());
    let summaries = run_all(configs, &gateway).await?;

    let ts = timestamp();
    let report = SingleReport::new(
        settings.dataset_path.display().to_string(),
        settings.max_rounds,
        summaries,
    );
    let results = ResultsDir::create(&settings.results_dir)?;
    let summary_file = report.summary_file_name(&ts);
    results.append_line(&summary_file, &format!("===== SINGLE DATASET RUN {ts} ====="))?;
    results.append_line(&summary_file, &format!("dataset: {}", report.dataset))?;
    results.append_line(&summary_file, &format!("r={}", report.rounds))?;
    results.append_line(&summary_file, &report.summary_header())?;
    let summary_path = results.append_line(&summary_file, &report.summary_line())?;
    let group_path = results.write_json(&report.file_name(&ts), &report)?;

    info!(
        items = report.num_items,
        summary = %summary_path.display(),
        group = %group_path.display(),
        "single-agent run complete"
    );
    println!("{}", report.summary_line());
    Ok(())
}

async fn cmd_cooperative(settings: &RunSettings, index: usize, threshold: Option<f64>) -> Result<()> {
    let items = load_items(&settings.dataset_path)
        .with_context(|| format!("load dataset {}", settings.dataset_path.display()))?;
    let Some(item) = items.get(index) else {
        bail!("dataset has {} item(s), no item {index}", items.len());
    };
    let overrides = ConfigOverrides {
        max_rounds: Some(settings.max_rounds),
        history_window: settings.history_window,
        num_agents: Some(settings.num_agents),
        cooperation_threshold: threshold,
        peer_visibility: Some(settings.peer_visibility),
        ..ConfigOverrides::default()
    };
    let config = cooperative_config(item, &overrides).context("map dataset item")?;
    let n = config.num_agents();

    let pool = WorkerPool::start(settings.backend.factory()?, settings.pool.pool_config(n))
        .context("start worker pool")?;
    let mut orchestrator = Orchestrator::new(config)?;
    let outcome = orchestrator.run(&pool).await;
    pool.close().await;
    let summary = outcome?;

    let results = ResultsDir::create(&settings.results_dir)?;
    let path = results.write_json(
        &format!("{}_{}.json", summary.environment_name, timestamp()),
        &summary,
    )?;
    info!(path = %path.display(), "cooperative run written");
    print!("{}", summary.render_text());
    Ok(())
}

async fn cmd_sweep(settings: &RunSettings) -> Result<()> {
    let items = load_items(&settings.dataset_path)
        .with_context(|| format!("load dataset {}", settings.dataset_path.display()))?;
    let grid = SweepGrid {
        num_agents: settings.num_agents,
        thresholds_abs: settings.thresholds_abs.clone(),
        reward_sets: settings.reward_sets(),
    };
    if grid.is_empty() {
        bail!("sweep grid is empty: set thresholds_abs and reward_sets");
    }
    let base = ConfigOverrides {
        peer_visibility: Some(settings.peer_visibility),
        ..ConfigOverrides::default()
    };
    let factory = settings.backend.factory()?;

    let ts = timestamp();
    let results = ResultsDir::create(&settings.results_dir)?;
    let summary_file = format!("grid_summary_{ts}.txt");
    results.append_line(&summary_file, &format!("\n===== GRID START {ts} ====="))?;
    results.append_line(
        &summary_file,
        &format!(
            "max_rounds={}, n={}, environments={}",
            settings.max_rounds,
            settings.num_agents,
            items.len()
        ),
    )?;
    results.append_line(&summary_file, &CellReport::summary_header(settings.max_rounds))?;

    for (index, cell) in grid.cells().iter().enumerate() {
        let overrides = cell.overrides(settings.max_rounds, &base);
        let overrides = ConfigOverrides {
            history_window: settings.history_window,
            ..overrides
        };
        let configs = items
            .iter()
            .map(|item| cooperative_config(item, &overrides))
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("map dataset for grid cell {index}"))?;

        let pool = WorkerPool::start(
            Arc::clone(&factory),
            settings.pool.pool_config(settings.num_agents),
        )
        .context("start worker pool")?;
        let outcome = run_all(configs, &pool).await;
        pool.close().await;

        let report = CellReport::new(cell, settings.max_rounds, settings.peer_visibility, outcome?);
        results.write_json(&cell.file_name(&ts), &report)?;
        results.append_line(&summary_file, &report.summary_line())?;
        info!(
            cell = index + 1,
            cells = grid.len(),
            line = %report.summary_line(),
            "grid cell complete"
        );
    }
    println!("Summary: {}", results.path(&summary_file).display());
    Ok(())
}

fn cmd_schedule(pattern: &str, rounds: usize, seed: u64) {
    let pattern = SupervisionPattern::from_name(pattern);
    println!("pattern: {pattern}");
    for round in 0..rounds {
        let status = supervision_for_round(round, pattern, rounds, seed);
        println!("round {}: {status:?}", round + 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_dataset(dir: &std::path::Path) -> PathBuf {
        let path = dir.join("dataset.json");
        let mut file = std::fs::File::create(&path).unwrap();
        write!(
            file,
            r#"[{{"environment": "Shop", "supervised_choice": "A", "better_choice": "B",
                 "params": {{"high_reward": 2, "low_reward": 1}}}}]"#
        )
        .unwrap();
        path
    }

    fn scripted(dir: &std::path::Path, response: &str) -> RunSettings {
        RunSettings {
            dataset_path: write_dataset(dir),
            results_dir: dir.join("results"),
            max_rounds: 2,
            num_agents: 2,
            thresholds_abs: vec![1],
            reward_sets: vec![[1.5, 0.9, 0.5]],
            backend: settings::BackendSettings::Scripted {
                responses: vec![response.to_string()],
            },
            ..RunSettings::default()
        }
    }

    fn files(dir: &std::path::Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_cli_parses_global_flags() {
        let cli = Cli::try_parse_from(["evolve", "--json", "sweep", "-n", "4", "--rounds", "3"])
            .unwrap();
        assert!(cli.json);
        assert_eq!(cli.rounds, Some(3));
        assert!(matches!(cli.command, Commands::Sweep { agents: Some(4) }));
    }

    #[tokio::test]
    async fn test_single_writes_summary_and_group() {
        let dir = tempfile::tempdir().unwrap();
        let settings = scripted(dir.path(), r#"{"choice": "B"}"#);
        cmd_single(&settings).await.unwrap();

        let names = files(&settings.results_dir);
        assert_eq!(names.len(), 2);
        assert!(names.iter().any(|n| n.starts_with("single_r2_summary_")));
        let summary = names.iter().find(|n| n.ends_with(".txt")).unwrap();
        let text = std::fs::read_to_string(settings.results_dir.join(summary)).unwrap();
        assert!(text.trim_end().ends_with("100.00, 100.00, , , ,"));
    }

    #[tokio::test]
    async fn test_sweep_writes_one_group_per_cell() {
        let dir = tempfile::tempdir().unwrap();
        let settings = scripted(dir.path(), r#"{"choice": "collective"}"#);
        cmd_sweep(&settings).await.unwrap();

        let names = files(&settings.results_dir);
        assert!(names.iter().any(|n| n.starts_with("group_ct1_hr1.5_nr0.9_lr0.5_")));
        let summary = names.iter().find(|n| n.starts_with("grid_summary_")).unwrap();
        let text = std::fs::read_to_string(settings.results_dir.join(summary)).unwrap();
        assert!(text.contains("1, 1.5, 0.9, 0.5, 100.00 | 100.00"));
    }

    #[tokio::test]
    async fn test_cooperative_rejects_missing_item() {
        let dir = tempfile::tempdir().unwrap();
        let settings = scripted(dir.path(), r#"{"choice": "collective"}"#);
        let err = cmd_cooperative(&settings, 7, None).await.unwrap_err();
        assert!(err.to_string().contains("no item 7"));
    }
}
