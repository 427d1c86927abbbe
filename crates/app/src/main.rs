use clap::Parser;

mod controller;

use controller::{ControllerCliArgs, ControllerConfig};

/// Watch a camera, fire a servo when a green target crosses the trigger line,
/// and stream the annotated view to one TCP viewer.
#[derive(Debug, Parser)]
#[command(name = "tripline", version, about)]
struct Cli {
    #[command(flatten)]
    controller: ControllerCliArgs,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err:?}");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    controller::init_tracing();
    let cli = Cli::parse();
    let config = ControllerConfig::try_from(cli.controller)?;
    controller::run(config)
}
