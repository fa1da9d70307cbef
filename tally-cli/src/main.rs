//! TALLY command-line entry point.

use std::io::Write;

use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use tally_cli::{init_logging, parse_args, run, Backends, LiveBackends, MemoryBackends};
use tally_core::TallyConfig;
use tracing::debug;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = match parse_args(std::env::args_os()) {
        Ok(cli) => cli,
        Err(e) => e.exit(),
    };
    init_logging(cli.verbose);

    let config = TallyConfig::load(cli.config.as_deref()).wrap_err("Failed to load configuration")?;
    debug!(memory = cli.memory, "Configuration loaded");

    let backends: Box<dyn Backends> = if cli.memory {
        Box::new(MemoryBackends::new(&config)?)
    } else {
        Box::new(LiveBackends::new(config.clone()))
    };

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    run(&cli.command, &config, backends.as_ref(), &mut out).await?;
    out.flush()?;
    Ok(())
}
