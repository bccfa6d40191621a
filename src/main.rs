//! kg-align CLI: train and evaluate cross-graph entity alignment.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};

use kg_align::checkpoint::Checkpoint;
use kg_align::config::TrainConfig;
use kg_align::eval::evaluate;
use kg_align::kg::load::load_cross_graph;
use kg_align::model::AlignModel;
use kg_align::train::Trainer;

#[derive(Parser)]
#[command(name = "kg-align", version, about = "Knowledge-graph entity alignment")]
struct Cli {
    /// TOML file with training parameters; defaults apply to missing fields.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train a model on a DBP15k-style data directory.
    Train {
        /// Directory with ent_ids_*, rel_ids_*, triples_* and ref_ent_ids.
        #[arg(long)]
        data: PathBuf,

        /// Where run directories are created.
        #[arg(long)]
        output_dir: Option<PathBuf>,

        #[arg(long)]
        run_name: Option<String>,

        #[arg(long)]
        epochs: Option<usize>,

        #[arg(long)]
        seed: Option<u64>,

        #[arg(long)]
        learning_rate: Option<f32>,

        #[arg(long)]
        batch_size: Option<usize>,

        /// Epochs between bootstrap rounds (0 disables bootstrapping).
        #[arg(long)]
        bootstrap_interval: Option<usize>,

        /// Transfer aligned triples between the graphs before training.
        #[arg(long)]
        graph_completion: bool,
    },

    /// Evaluate a checkpoint on the held-out pairs of a data directory.
    Evaluate {
        #[arg(long)]
        data: PathBuf,

        /// Checkpoint written by `train` (`<run dir>/model.bin`).
        #[arg(long)]
        checkpoint: PathBuf,
    },

    /// Print the effective configuration as TOML, optionally writing it out.
    Config {
        /// Write the configuration to this file.
        #[arg(long)]
        write: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))
    .ok(); // Ignore error if hook already set (e.g., in tests)

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => TrainConfig::load(path)?,
        None => TrainConfig::default(),
    };

    match cli.command {
        Commands::Train {
            data,
            output_dir,
            run_name,
            epochs,
            seed,
            learning_rate,
            batch_size,
            bootstrap_interval,
            graph_completion,
        } => {
            if output_dir.is_some() {
                config.output_dir = output_dir;
            }
            if let Some(name) = run_name {
                config.run_name = name;
            }
            config.epochs = epochs.unwrap_or(config.epochs);
            config.seed = seed.unwrap_or(config.seed);
            config.learning_rate = learning_rate.unwrap_or(config.learning_rate);
            config.batch_size = batch_size.unwrap_or(config.batch_size);
            config.bootstrap_interval = bootstrap_interval.unwrap_or(config.bootstrap_interval);
            config.graph_completion |= graph_completion;
            config.validate()?;

            print!("{}", config.summary());
            let dataset = load_cross_graph(&data, config.train_ratio, config.seed)?;
            let mut trainer = Trainer::new(config, dataset)?;
            let summary = trainer.train()?;

            println!(
                "Trained {} epochs, final loss {:.4} (align {:.4}, transe {:.4})",
                summary.epochs,
                summary.final_loss.total,
                summary.final_loss.align,
                summary.final_loss.transe
            );
            if summary.pseudo_pairs > 0 {
                println!("Pseudo-labelled pairs: {}", summary.pseudo_pairs);
            }
            if let Some(report) = &summary.report {
                print!("{report}");
            }
            if let Some(path) = &summary.checkpoint {
                println!("Checkpoint: {}", path.display());
            }
        }

        Commands::Evaluate { data, checkpoint } => {
            let ckpt = Checkpoint::load(&checkpoint)?;
            let config = ckpt.config.clone();
            let mut dataset = load_cross_graph(&data, config.train_ratio, config.seed)?;
            let model = ckpt.restore_model(&mut dataset)?;

            if dataset.test_pairs.is_empty() {
                miette::bail!("data set has no held-out pairs to evaluate on");
            }
            let sr: Vec<usize> = dataset.test_pairs.iter().map(|p| p.0).collect();
            let tg: Vec<usize> = dataset.test_pairs.iter().map(|p| p.1).collect();
            let dist = model.predict(&sr, &tg)?;
            println!(
                "Checkpoint after {} epochs, {} test pairs:",
                ckpt.epoch,
                dataset.test_pairs.len()
            );
            print!("{}", evaluate(&dist, &config.top_k));
        }

        Commands::Config { write } => {
            let text = toml::to_string_pretty(&config).into_diagnostic()?;
            print!("{text}");
            if let Some(path) = write {
                config.save(&path)?;
                println!("Wrote {}", path.display());
            }
        }
    }

    Ok(())
}
