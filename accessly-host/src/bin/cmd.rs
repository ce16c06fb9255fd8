//! Accessly cmd - admin console for the kiosk install

use accessly_host::cli::Console;
use accessly_host::config::KioskConfig;
use accessly_host::env::KioskEnv;
use accessly_host::logging;
use anyhow::{Context, Result};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "accessly-cmd", about = "Kiosk admin console", version)]
struct Args {
    /// Kiosk account whose install is inspected
    #[arg(long)]
    user: Option<String>,

    /// Command to run before the prompt, e.g. `get cache`
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut env = KioskEnv::detect(None).context("Failed to detect kiosk environment")?;
    if let Some(user) = &args.user {
        env = env.with_user(user)?;
    }
    let config = KioskConfig::load(&env).await?;
    let _guard = logging::init(&env.logs_dir(), "cmd", false);

    let stdin = std::io::stdin();
    let mut console = Console::new(env, config, stdin.lock(), std::io::stdout());
    console.run(args.command).await
}
