mod cli;

use assetmatrix::config::Config;
use assetmatrix::orchestrator::Orchestrator;
use clap::Parser;
use cli::{BuildArgs, Cli, Commands};

/// Load configuration and apply command-line overrides
fn load_config(args: &BuildArgs) -> Result<Config, Box<dyn std::error::Error + Send + Sync>> {
    let mut config = match &args.config {
        Some(path) => Config::load_from_path(path.clone())?,
        None => Config::load()?,
    };

    if !args.inputs.is_empty() {
        config.build.input_dirs = args.inputs.clone();
    }
    if let Some(output) = &args.output {
        config.build.output_dir = output.clone();
    }
    if let Some(fd_limit) = args.fd_limit {
        config.limits.fd_limit = fd_limit;
    }

    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Build(args) => {
            let config = load_config(&args)?;
            let orchestrator = Orchestrator::from_config(&config)?;
            let report = orchestrator.run(&config.build.input_dirs).await?;
            println!(
                "Built {} assets into {}",
                report.outputs.len(),
                config.build.output_dir.display()
            );
        }
        Commands::Plan(args) => {
            let config = load_config(&args)?;
            let orchestrator = Orchestrator::from_config(&config)?;
            for planned in orchestrator.plan(&config.build.input_dirs).await? {
                println!("{planned}");
            }
        }
    }

    Ok(())
}
