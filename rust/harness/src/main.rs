//! Probe Harness CLI
//!
//! Dispatches probe jobs across the free GPUs of this machine and reports on
//! the job ledger.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use probe_harness::{
    config::HarnessConfig,
    device::{self, DeviceQuery, DeviceReset, FixedDevices, NoReset, NvidiaSmi, NvidiaSmiReset},
    dispatcher::Dispatcher,
    plan::{self, AutoConfirm, Confirm, StdinConfirm},
    pool::DevicePool,
    runner::ProcessRunner,
    state::StateManager,
};
use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "probe-harness", about = "Parallel probe job harness")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Plan and run all probe jobs
    Run {
        /// Path to harness.toml config file
        #[arg(short, long, default_value = "harness.toml")]
        config: String,

        /// Print the planned jobs and devices without running anything
        #[arg(long)]
        dry_run: bool,

        /// Continue without asking when some configs are missing
        #[arg(short, long)]
        yes: bool,

        /// Pass --test to every job
        #[arg(long)]
        test: bool,

        /// Pass --run-all to every job
        #[arg(long)]
        run_all: bool,

        /// Use these device indices instead of querying nvidia-smi
        #[arg(long, value_delimiter = ',')]
        devices: Option<Vec<u32>>,

        /// Path to probe binary (auto-detected if not specified)
        #[arg(long)]
        probe_binary: Option<String>,
    },

    /// Show status of jobs
    Status {
        /// Path to state file
        #[arg(short, long, default_value = "./harness_state.json")]
        state: String,
    },

    /// List devices and whether they are eligible
    Devices {
        /// Free memory a device needs, in MiB
        #[arg(long, default_value_t = 40 * 1024)]
        threshold_mib: u64,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // tracing needs to be initialized with indicatif_layer to not clobber progress bars
    let indicatif_layer = IndicatifLayer::new();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(indicatif_layer.get_stderr_writer()))
        .with(
            EnvFilter::builder()
                .with_default_directive(tracing::Level::INFO.into())
                .from_env_lossy(),
        )
        .with(indicatif_layer)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            dry_run,
            yes,
            test,
            run_all,
            devices,
            probe_binary,
        } => {
            let mut harness_config = HarnessConfig::load(&config)?;
            harness_config.harness.test_mode |= test;
            harness_config.harness.run_all |= run_all;
            if harness_config.harness.test_mode {
                tracing::info!("Running in test mode");
            }
            let settings = harness_config.harness.clone();

            let probe_binary = probe_binary
                .or_else(|| settings.probe_binary.clone())
                .or_else(ProcessRunner::find_probe_binary)
                .ok_or("Could not find probe binary. Please specify --probe-binary")?;

            let job_plan = plan::plan_jobs(&harness_config, &probe_binary);
            println!("Planned task list:");
            for (i, job) in job_plan.jobs.iter().enumerate() {
                println!("{}. {}", i + 1, job.command_line());
            }
            println!("Total tasks: {}", job_plan.jobs.len());

            let mut confirm: Box<dyn Confirm> = if yes {
                Box::new(AutoConfirm(true))
            } else {
                Box::new(StdinConfirm)
            };
            let jobs = job_plan.confirm(confirm.as_mut());
            if jobs.is_empty() {
                println!("No tasks to run.");
                return Ok(());
            }

            let overridden = devices.is_some();
            let query: Box<dyn DeviceQuery> = match devices {
                Some(indices) => Box::new(FixedDevices(indices)),
                None => Box::new(NvidiaSmi),
            };
            let eligible = device::discover(query.as_ref(), settings.min_free_mib)?;
            println!(
                "Available GPUs: {}",
                eligible
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            );

            if dry_run {
                return Ok(());
            }

            let ledger = Arc::new(StateManager::new(&settings.state_file));
            let interrupted = ledger.recover_interrupted()?;
            if !interrupted.is_empty() {
                tracing::info!(
                    "Found {} jobs interrupted by an earlier harness: {:?}",
                    interrupted.len(),
                    interrupted
                );
            }

            let reset: Arc<dyn DeviceReset> = if settings.reset_devices && !overridden {
                Arc::new(NvidiaSmiReset)
            } else {
                Arc::new(NoReset)
            };
            let runner = Arc::new(ProcessRunner::new(&settings.log_dir, settings.rust_log.clone()));
            let dispatcher = Dispatcher::new(
                DevicePool::new(eligible),
                runner,
                reset,
                settings.max_retries,
            )
            .with_ledger(ledger);

            println!("Starting harness with config: {config}");
            let result = dispatcher.run(jobs).await?;

            println!();
            println!("=== Harness Complete ===");
            println!("Total: {}", result.total);
            println!("Succeeded: {}", result.succeeded);
            println!("Failed: {}", result.failed);
            println!("Attempts: {}", result.attempts);

            if result.failed > 0 {
                return Err(format!("{} jobs failed after all retries", result.failed).into());
            }
        }

        Commands::Status { state } => {
            let state_manager = StateManager::new(&state);
            let harness_state = state_manager.load()?;

            if harness_state.jobs.is_empty() {
                println!("No jobs in state file.");
                return Ok(());
            }

            println!("=== Job Status ===");
            println!();

            let mut jobs: Vec<_> = harness_state.jobs.iter().collect();
            jobs.sort_by_key(|(label, _)| *label);

            for (label, job) in jobs {
                print!("{label}: {}", job.status.label());

                if let Some(device) = job.device {
                    print!(" (device {device})");
                }

                if job.attempts > 1 {
                    print!(" [attempts: {}]", job.attempts);
                }

                if let Some(ref finished) = job.finished_at {
                    print!(" [finished {finished}]");
                }

                println!();

                if let Some(error) = job.errors.last() {
                    for line in error.lines() {
                        println!("  Error: {line}");
                    }
                }
            }
        }

        Commands::Devices { threshold_mib } => {
            let devices = NvidiaSmi.query()?;
            println!("=== Devices ===");
            for d in &devices {
                println!(
                    "GPU {}: {} MiB used, {} MiB free{}",
                    d.index,
                    d.memory_used_mib,
                    d.memory_free_mib,
                    if d.memory_free_mib > threshold_mib {
                        ""
                    } else {
                        " (not eligible)"
                    }
                );
            }
        }
    }

    Ok(())
}
