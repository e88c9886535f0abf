use std::{
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use burn::{
    backend::{Autodiff, Wgpu},
    config::Config,
};
use clap::{Parser, Subcommand};
use log::{info, warn};
use speculo::{
    config::SpeculoConfig,
    face_database::{face_image::read_image, face_index::FaceIndex},
    logging::SpeculoLogger,
    speculo::{
        autoencoder::SpeculoAutoencoderConfig,
        inference::{Inference, Prediction},
        progress::TrainingHooks,
        training::train,
    },
};

type MyBackend = Wgpu<f32, i32>;
type MyAutodiffBackend = Autodiff<MyBackend>;

#[derive(Parser)]
#[command(version, about = "Trains and runs the face frontalization autoencoder")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Trains a new run under the configured models directory
    Train {
        /// json file holding a SpeculoConfig, defaults are used otherwise
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Renders the comparison grid of a saved model over an evaluate set
    Evaluate {
        #[arg(long)]
        model: PathBuf,
        /// model_config.json of the run the model belongs to
        #[arg(long)]
        config: PathBuf,
        #[arg(long, default_value = "dataset/evaluate")]
        evaluate_dir: PathBuf,
        #[arg(long, default_value = "predictions.png")]
        output: PathBuf,
    },
    /// Frontalizes a single image
    Predict {
        image: PathBuf,
        #[arg(long)]
        model: PathBuf,
        #[arg(long)]
        config: PathBuf,
        #[arg(long, default_value = "prediction.png")]
        output: PathBuf,
    },
    /// Writes the pair index of a split directory for lazy training
    BuildIndex {
        split_dir: PathBuf,
        #[arg(default_value = "dataset/face_index.ron")]
        index_file: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let stream = rerun::RecordingStreamBuilder::new("speculo").spawn()?;
    let rec = SpeculoLogger::new(stream.clone());

    rerun::Logger::new(stream) // recording streams are ref-counted
        .with_path_prefix("logs")
        .with_filter(rerun::default_log_filter())
        .init()?;

    let device = burn::backend::wgpu::WgpuDevice::default();

    match cli.command {
        Commands::Train { config } => {
            let config = match config {
                Some(path) => SpeculoConfig::load(path)?,
                None => SpeculoConfig::new(),
            };
            let interrupt = Arc::new(AtomicBool::new(false));
            let handler_flag = interrupt.clone();
            // a second ctrl-c skips the report
            ctrlc::set_handler(move || {
                if handler_flag.swap(true, Ordering::SeqCst) {
                    warn!("second interrupt received, exiting");
                    std::process::exit(130);
                }
                warn!("interrupt received, finishing up (press ctrl-c again to exit now)");
            })?;

            let hooks = TrainingHooks::new();
            let outcome = train::<MyAutodiffBackend>(config, device, rec, &interrupt, hooks)?;
            info!(
                "run {} finished as {:?}, report in {}",
                outcome.record.run_id,
                outcome.exit_state(),
                outcome.record.readme_path().display()
            );
        }
        Commands::Evaluate {
            model,
            config,
            evaluate_dir,
            output,
        } => {
            let model_config = SpeculoAutoencoderConfig::load(config)?;
            let mut inference = Inference::<MyBackend>::new(model_config, model, evaluate_dir, device);
            let grid = inference.evaluate("Model Predictions", Some(output.as_path()))?;
            rec.log_picture("predictions", &grid.render()?);
        }
        Commands::Predict {
            image,
            model,
            config,
            output,
        } => {
            let model_config = SpeculoAutoencoderConfig::load(config)?;
            let input = read_image(&image, model_config.input_shape)?;
            let mut inference = Inference::<MyBackend>::new(model_config, model, "", device);
            if let Prediction::Preview(picture) = inference.predict(&input, true)? {
                let picture = picture.into_dynamic_image()?;
                picture.save(&output)?;
                rec.log_picture("prediction", &picture);
                info!("prediction saved to {}", output.display());
            }
        }
        Commands::BuildIndex {
            split_dir,
            index_file,
        } => {
            let index = FaceIndex::from_directory(&split_dir)?;
            index.save_to_ron(&index_file)?;
            info!("indexed {} pairs into {}", index.len(), index_file.display());
        }
    }
    Ok(())
}
