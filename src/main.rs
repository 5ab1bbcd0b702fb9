use clap::Parser;
use image_probe::{setup_logging, Cli, CliRunner};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();
    setup_logging(args.verbose);

    info!("starting image-probe v{}", env!("CARGO_PKG_VERSION"));

    // One token covers every in-flight probe; ctrl-c cancels them all.
    let cancel = CancellationToken::new();
    let _shutdown_handler = setup_shutdown_handler(cancel.clone());

    let runner = CliRunner::new(args.probe_options());
    let result = runner.run(args.command, &cancel).await;

    if cancel.is_cancelled() {
        info!("interrupted, outstanding probes were cancelled");
    }
    result
}

fn setup_shutdown_handler(cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("received interrupt signal");
            cancel.cancel();
        }
    })
}
