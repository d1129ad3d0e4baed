use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use pd_bench::config::{Cli, Config};
use pd_bench::gpu::device;
use pd_bench::topology::TopologyKind;
use pd_bench::{Collaborators, RunController};

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Parse CLI arguments.
    let cli = Cli::parse();

    // Initialize tracing/logging.
    let filter = if cli.verbose {
        "pd_bench=debug"
    } else {
        "pd_bench=info"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| filter.into());
    if cli.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }

    info!("pd-bench v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration.
    let mut config = Config::load(&cli.config)?;
    config.apply_cli(&cli);

    info!(
        model = %config.model,
        qps = ?config.benchmark.qps_levels,
        output_len = config.benchmark.output_len,
        results = %config.results_dir.display(),
        "Configuration loaded"
    );

    let pool_size = device::pool_size(config.gpu_count).await;
    let collaborators = Collaborators::system(&config);
    let controller = RunController::new(config.clone(), pool_size, collaborators);

    if cli.dry_run {
        for kind in TopologyKind::ALL {
            let (partition, specs) = controller.launcher().plan(kind)?;
            println!("# {kind} (half_size={})", partition.half_size);
            for spec in &specs {
                println!("{}", spec.command(&config.engine, &config.model));
            }
        }
        return Ok(ExitCode::SUCCESS);
    }

    let summary = controller.run().await?;
    if summary.any_launch_failed() {
        error!(run_id = %summary.run_id, "At least one topology failed to launch");
        return Ok(ExitCode::FAILURE);
    }

    info!(run_id = %summary.run_id, "Benchmark run complete");
    Ok(ExitCode::SUCCESS)
}
