use crate::demo::{run_demo, run_nearby, DemoArgs, NearbyArgs};
use crate::server;
use clap::{Args, Parser, Subcommand};
use olla::error::AppError;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "olla",
    about = "Run the Olla trust broker: contact disclosure, payment webhooks, bypass escalation and producer search",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Walk an order through payment, disclosure and a bypass report against an in-memory store
    Demo(DemoArgs),
    /// List producers near a point from a CSV fixture
    Nearby(NearbyArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
    /// Seed the in-memory store with producers from a CSV file
    #[arg(long)]
    pub(crate) producers_csv: Option<PathBuf>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Demo(args) => run_demo(args).await,
        Command::Nearby(args) => run_nearby(args).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serve_is_the_default_command() {
        let cli = Cli::try_parse_from(["olla"]).expect("empty invocation parses");
        assert!(cli.command.is_none());
    }

    #[test]
    fn nearby_requires_coordinates() {
        assert!(Cli::try_parse_from(["olla", "nearby", "--producers-csv", "p.csv"]).is_err());

        let cli = Cli::try_parse_from([
            "olla",
            "nearby",
            "--lat",
            "-34.6",
            "--lon",
            "-58.4",
            "--producers-csv",
            "p.csv",
        ])
        .expect("nearby parses");
        match cli.command {
            Some(Command::Nearby(args)) => {
                assert_eq!(args.lat, -34.6);
                assert!(args.radius_km.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
