use hyper::server::conn::AddrStream;
use hyper::service::{make_service_fn, service_fn};
use hyper::Server;
use log::{info, warn};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use structopt::StructOpt;
use tf_serve::{AssetPaths, ClassifierConfig, ImageClassifier, Normalization, OutputKind};

mod page;
mod routes;
mod session;

use routes::App;
use session::SessionStore;

#[derive(StructOpt, Debug)]
#[structopt(
    name = "tf-webapp",
    about = "Web page that classifies uploaded images with TensorFlow"
)]
struct CmdArgs {
    #[structopt(long, env = "TF_BIND", default_value = "127.0.0.1:8501")]
    bind: SocketAddr,

    #[structopt(
        long,
        env = "TF_MODELS_DIR",
        default_value = "models",
        help = "Directory prepared by tf-setup"
    )]
    models_dir: PathBuf,

    #[structopt(long, env = "TF_MAX_UPLOAD_BYTES", default_value = "209715200")]
    max_upload_bytes: usize,

    #[structopt(
        long,
        env = "TF_MAX_SESSIONS",
        default_value = "1000",
        help = "Sessions kept in memory before the least recently used are dropped"
    )]
    max_sessions: u64,

    #[structopt(
        long,
        env = "TF_SESSION_IDLE_SECS",
        default_value = "1800",
        help = "Seconds without a request after which a session is dropped"
    )]
    session_idle_secs: u64,

    #[structopt(
        long,
        env = "TF_NORMALIZATION",
        default_value = "unit",
        help = "Input normalization: raw, unit, tf, torch or caffe"
    )]
    normalization: Normalization,

    #[structopt(
        long,
        env = "TF_OUTPUT",
        default_value = "logits",
        help = "Model output: probabilities or logits"
    )]
    output: OutputKind,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = CmdArgs::from_args();

    let config = ClassifierConfig {
        normalization: args.normalization,
        output: args.output,
        ..ClassifierConfig::from_assets(&AssetPaths::in_dir(&args.models_dir))
    };

    // Loaded once and shared by every session for the life of the process.
    let classifier = ImageClassifier::load(&config).inspect_err(|_| {
        warn!("Run tf-setup to download the model into {}", args.models_dir.display());
    })?;
    let sessions = SessionStore::new(
        args.max_sessions,
        Duration::from_secs(args.session_idle_secs),
    );
    let app = Arc::new(App::new(
        Arc::new(classifier),
        sessions,
        args.max_upload_bytes,
    ));

    let make_service = make_service_fn(move |_conn: &AddrStream| {
        let app = Arc::clone(&app);

        let service = service_fn(move |req| routes::handle(req, Arc::clone(&app)));

        async move { Ok::<_, Infallible>(service) }
    });

    let server = Server::try_bind(&args.bind)?.serve(make_service);

    info!("Listening on http://{}", args.bind);

    server
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Could not install Ctrl-C handler: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await?;

    info!("Server stopped");

    Ok(())
}
