use syncbridge_worker::WORKER_HOSTNAME;
use syncbridge_worker::error::WorkerError;
use syncbridge_worker::logging;
use syncbridge_worker::randomiser;
use syncbridge_worker::server::{AppState, serve};
use syncbridge_worker::store::ItemStore;

use common::envelope::DEFAULT_FRESHNESS_TOLERANCE_MS;
use common::session::{KeyExchange, Session, public_key_from_token};

use std::process::exit;
use std::sync::Arc;

use clap::Parser;
use log::info;
use tokio::net::TcpListener;
use tokio::signal::ctrl_c;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(name = "syncbridge-worker", about = "SyncBridge detached worker process")]
struct Args {
    /// Loopback port to listen on (e.g. --port 48732)
    #[arg(long)]
    port: u16,

    /// Bearer token passed by the host; carries the host's public key
    #[arg(long)]
    token: String,

    /// Envelope freshness tolerance in milliseconds
    #[arg(long, default_value_t = DEFAULT_FRESHNESS_TOLERANCE_MS)]
    tolerance_ms: i64,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Err(e) = run(args).await {
        eprintln!("Exiting: {e}");
        exit(1);
    }
}

async fn run(args: Args) -> Result<(), WorkerError> {
    logging::initialize()?;

    // Handshake: the PEM block goes straight to stdout where the host's
    // spawn component is scanning for it.
    let keys = KeyExchange::generate();
    println!("{}", keys.public_key_pem());

    let remote = public_key_from_token(&args.token)?;
    let mut session = Session::with_token(keys, args.token.clone(), args.tolerance_ms);
    session.install_remote(&remote)?;
    let codec = Arc::new(session.into_codec()?);

    let store = Arc::new(ItemStore::new());
    store.add().await;

    let shutdown = CancellationToken::new();

    tokio::spawn(randomiser::run(Arc::clone(&store), shutdown.clone()));

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if ctrl_c().await.is_ok() {
                info!("Shutdown signal received");
                shutdown.cancel();
            }
        });
    }

    let listener = TcpListener::bind((WORKER_HOSTNAME, args.port)).await?;

    serve(
        listener,
        AppState {
            store,
            codec,
            token: Arc::new(args.token),
            shutdown,
        },
    )
    .await
}
