mod checkpoint;
mod cli;
mod config;
mod cost;
mod fetcher;
mod recorder;
mod scheduler;
mod spread;
mod supervisor;
mod types;
mod validator;
mod window;

use cli::Cli;
use supervisor::ExitCode;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("arb_monitor=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();
    let code = supervisor::run(cli).await;

    std::process::exit(match code {
        ExitCode::Clean => 0,
        ExitCode::StartupFailure => 1,
        ExitCode::FatalLogWrite => 2,
        ExitCode::Interrupted => 130,
    });
}
