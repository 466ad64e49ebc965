use clap::Parser;
use ordkv::cli::Command;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    // Initialize logging, RUST_LOG overrides the default level
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    // Parse CLI arguments
    let cmd = Command::parse();
    ordkv::codec::init_default(cmd.codec)?;

    // Execute command
    ordkv::cli::execute_command(cmd)?;

    Ok(())
}
