use std::path::PathBuf;

use anyhow::Context;
use log::warn;
use structopt::StructOpt;
use tf_serve::provision::{HttpFetcher, Provisioner};
use tf_serve::{AssetPaths, ProvisionConfig, DEFAULT_LABELS_URL, DEFAULT_WEIGHTS_URL};

#[derive(StructOpt, Debug)]
#[structopt(
    name = "tf-setup",
    about = "Download the pretrained model and ImageNet class labels"
)]
struct CmdArgs {
    #[structopt(
        long,
        env = "TF_MODELS_DIR",
        default_value = "models",
        help = "Directory the assets are stored in"
    )]
    models_dir: PathBuf,

    #[structopt(
        long,
        env = "TF_WEIGHTS_URL",
        help = "URL of the gzipped SavedModel archive [default: EfficientNetV2-B0 on TF Hub]"
    )]
    weights_url: Option<String>,

    #[structopt(
        long,
        env = "TF_LABELS_URL",
        help = "URL of the ImageNet class index JSON"
    )]
    labels_url: Option<String>,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = CmdArgs::from_args();

    let config = ProvisionConfig {
        paths: AssetPaths::in_dir(&args.models_dir),
        weights_url: args
            .weights_url
            .unwrap_or_else(|| DEFAULT_WEIGHTS_URL.to_owned()),
        labels_url: args
            .labels_url
            .unwrap_or_else(|| DEFAULT_LABELS_URL.to_owned()),
    };

    let fetcher = HttpFetcher::new().context("could not build HTTP client")?;
    let report = Provisioner::new(config, fetcher)
        .run()
        .with_context(|| format!("could not prepare {}", args.models_dir.display()))?;

    // Failed downloads are already logged; a partial setup is not fatal.
    if !report.is_complete() {
        warn!("weights: {}", report.weights);
        warn!("labels: {}", report.labels);
    }

    Ok(())
}
