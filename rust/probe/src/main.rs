//! Probe CLI
//!
//! Runs forward/backward probes for one relation config, or the
//! semantic-judgment pass over finished results.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use probe_config::{FrequencySetting, ProbeConfig};
use probe_exec::{
    BatchExecutor, CheckpointKey, CheckpointStore, ExecutionOutcome, JobIdentity, Prober,
    backend, checkpoint::write_atomic, judge,
};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "probe", about = "Forward/backward fact probe")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Probe every frequency slice of a relation
    Run {
        /// Path to the probe config file
        #[arg(short, long)]
        config_file: PathBuf,

        /// Override the model from the config
        #[arg(long)]
        model: Option<String>,

        /// Probe the whole dataset as one slice, ignoring thresholds
        #[arg(long)]
        run_all: bool,

        /// Only probe the first `test_items` items of each slice
        #[arg(long)]
        test: bool,
    },

    /// Judge finished results with an evaluation model
    Judge {
        /// Path to the probe config file
        #[arg(short, long)]
        config_file: PathBuf,

        /// Slice whose final results are judged
        #[arg(long, value_enum)]
        setting: FrequencySetting,

        /// Override the judge model from the config
        #[arg(long)]
        model: Option<String>,

        /// Model whose results are judged, as given to `run --model`
        #[arg(long)]
        probed_model: Option<String>,

        /// Judge results of a test run
        #[arg(long)]
        test: bool,
    },
}

fn identity(config: &ProbeConfig, setting: FrequencySetting) -> JobIdentity {
    JobIdentity {
        relation: config.relation.clone(),
        count_high: config.count_high,
        count_low: config.count_low,
        setting,
        template: config.template_type,
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(tracing::Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config_file,
            model,
            run_all,
            test,
        } => {
            let mut config = ProbeConfig::load(&config_file)?;
            if let Some(model) = model {
                config.model = model;
            }
            if let Ok(device) = std::env::var("CUDA_VISIBLE_DEVICES") {
                tracing::info!("CUDA_VISIBLE_DEVICES={device}");
            }

            let prober = Prober::from_config(&config)?;
            let dataset = probe_data::load_triples(config.dataset_path())?;
            tracing::info!(
                relation = %config.relation,
                model = %config.model,
                items = dataset.len(),
                "loaded dataset"
            );

            let backend = backend::from_config(&config.backend, &config.model)?;
            let store = CheckpointStore::flat(config.result_dir(test));
            let mut executor = BatchExecutor::new(
                backend,
                prober,
                store,
                config.sampling.clone(),
                config.batch_size,
            );

            for setting in ProbeConfig::settings(run_all) {
                let mut items = probe_data::select(
                    &dataset,
                    setting,
                    config.count_high,
                    config.count_low,
                );
                if test {
                    items.truncate(config.test_items);
                }
                tracing::info!("[{}] probing for [{setting}]: {} items", config.template_type, items.len());

                match executor.run(&identity(&config, setting), &items)? {
                    ExecutionOutcome::Skipped { path } => {
                        println!("{setting}: already complete ({})", path.display());
                    }
                    ExecutionOutcome::Completed {
                        batches_run,
                        batches_resumed,
                        path,
                        hits,
                    } => {
                        println!(
                            "{setting}: {}-{} / {} -> {} ({batches_run} batches run, {batches_resumed} resumed)",
                            hits.0,
                            hits.1,
                            items.len(),
                            path.display()
                        );
                    }
                }
            }
        }

        Commands::Judge {
            config_file,
            setting,
            model,
            probed_model,
            test,
        } => {
            let mut config = ProbeConfig::load(&config_file)?;
            let judge_model = model.unwrap_or_else(|| config.judge_model().to_string());
            if let Some(probed_model) = probed_model {
                config.model = probed_model;
            }

            let store = CheckpointStore::flat(config.result_dir(test));
            let final_path = store.path(&CheckpointKey::final_result(&identity(&config, setting)));
            let mut acc = store.load(&final_path)?;
            tracing::info!(path = %final_path.display(), model = %judge_model, "judging results");

            let mut backend = backend::from_config(&config.backend, &judge_model)?;
            let summary = judge::judge(backend.as_mut(), &mut acc, config.template_type)?;

            let out = judge::softem_path(&final_path);
            write_atomic(&out, &acc)?;
            tracing::info!(path = %out.display(), "saved judged results");

            println!("Forward Soft EM (anyone): {}", summary.forward.anyone_rate());
            println!("Backward Soft EM (anyone): {}", summary.backward.anyone_rate());
            println!("Forward Soft EM (majority): {}", summary.forward.majority_rate());
            println!("Backward Soft EM (majority): {}", summary.backward.majority_rate());
        }
    }

    Ok(())
}
