use std::path::{Path, PathBuf};

use log::info;
use structopt::StructOpt;
use tf_serve::{AssetPaths, ClassifierConfig, ImageClassifier, Normalization, OutputKind};

#[derive(StructOpt, Debug)]
#[structopt(
    name = "tf-classify",
    about = "CLI app to perform image classification with TensorFlow"
)]
struct CmdArgs {
    #[structopt(help = "Image file or http(s) URL to classify")]
    image: String,

    #[structopt(
        long,
        env = "TF_MODELS_DIR",
        default_value = "models",
        help = "Directory holding the provisioned model and labels"
    )]
    models_dir: PathBuf,

    #[structopt(
        long,
        default_value = "5",
        parse(try_from_str = tf_serve::parse_top_k),
        help = "Number of predictions to print, at least 1"
    )]
    top_k: usize,

    #[structopt(
        long,
        default_value = "unit",
        help = "Input normalization: raw, unit, tf, torch or caffe"
    )]
    normalization: Normalization,

    #[structopt(long, default_value = "logits", help = "Model output: probabilities or logits")]
    output: OutputKind,

    #[structopt(long, help = "Print the classification as JSON")]
    json: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = CmdArgs::from_args();

    let config = ClassifierConfig {
        top_k: args.top_k,
        normalization: args.normalization,
        output: args.output,
        ..ClassifierConfig::from_assets(&AssetPaths::in_dir(&args.models_dir))
    };

    let classifier = ImageClassifier::load(&config)?;

    let classification = if args.image.starts_with("http://") || args.image.starts_with("https://")
    {
        classifier.classify_from_url(&args.image)?
    } else {
        classifier.classify_from_path(Path::new(&args.image))?
    };

    if args.json {
        println!("{}", serde_json::to_string(&classification)?);
        return Ok(());
    }

    for prediction in &classification.predictions {
        println!(
            "{:50} {:5.2}%",
            prediction.class_name,
            100.0 * prediction.confidence
        );
    }

    info!("{}", serde_json::to_string(&classification.timings)?);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::CmdArgs;
    use structopt::StructOpt;

    #[test]
    fn top_k_must_be_positive() {
        let args = CmdArgs::from_iter_safe(&["tf-classify", "dog.jpg", "--top-k", "3"]).unwrap();
        assert_eq!(args.top_k, 3);

        assert!(CmdArgs::from_iter_safe(&["tf-classify", "dog.jpg", "--top-k", "0"]).is_err());
    }
}
