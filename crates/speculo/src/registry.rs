use std::{
    fs::{self, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
};

use log::info;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use walkdir::WalkDir;

use crate::face_database::face_image::ImageShape;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("{} already existing", .0.display())]
    RunAlreadyExists(PathBuf),
    #[error("Unable to list runs due to {:?}", .0)]
    WalkError(#[from] walkdir::Error),
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
}

/// Hyperparameters recorded in the run manifest.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub optimizer: String,
    pub loss_function: String,
    pub learning_rate: f64,
    pub input_shape: ImageShape,
    pub output_shape: ImageShape,
    pub encoder_filters: Vec<usize>,
    pub decoder_filters: Vec<usize>,
    pub latent_size: usize,
}

fn filters(values: &[usize]) -> String {
    let joined: Vec<String> = values.iter().map(|v| v.to_string()).collect();
    format!("({})", joined.join(", "))
}

/// Hands out run directories below a base directory, one per training invocation.
#[derive(Debug, Clone)]
pub struct RunRegistry {
    base_dir: PathBuf,
}

impl RunRegistry {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// `1 +` the number of entries in the base directory; 1 when it does not exist yet.
    pub fn next_run_id(&self) -> Result<usize, RegistryError> {
        if !self.base_dir.is_dir() {
            return Ok(1);
        }
        let mut count = 0;
        for entry in WalkDir::new(&self.base_dir).min_depth(1).max_depth(1) {
            entry?;
            count += 1;
        }
        Ok(count + 1)
    }

    /// Fixes the id of the next run without touching the file system.
    pub fn reserve(&self) -> Result<PendingRun, RegistryError> {
        let run_id = self.next_run_id()?;
        Ok(PendingRun {
            run_id,
            directory: self.base_dir.join(run_id.to_string()),
        })
    }

    pub fn start_run(&self, summary: RunSummary) -> Result<RunRecord, RegistryError> {
        self.reserve()?.start(summary)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRun {
    run_id: usize,
    directory: PathBuf,
}

impl PendingRun {
    pub fn run_id(&self) -> usize {
        self.run_id
    }

    /// Creates `<base>/<run_id>/img/` and writes the manifest header. Fails instead of
    /// reusing a directory that already exists.
    pub fn start(self, summary: RunSummary) -> Result<RunRecord, RegistryError> {
        if self.directory.exists() {
            return Err(RegistryError::RunAlreadyExists(self.directory));
        }
        fs::create_dir_all(self.directory.join("img"))?;
        let record = RunRecord {
            run_id: self.run_id,
            directory: self.directory,
            summary,
        };
        record.write_manifest_header()?;
        info!(
            "started run {} in {}",
            record.run_id,
            record.directory.display()
        );
        Ok(record)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunRecord {
    pub run_id: usize,
    pub directory: PathBuf,
    pub summary: RunSummary,
}

impl RunRecord {
    pub fn img_dir(&self) -> PathBuf {
        self.directory.join("img")
    }

    pub fn readme_path(&self) -> PathBuf {
        self.directory.join("README.md")
    }

    /// Best-loss artifact, without the recorder's file extension.
    pub fn checkpoint_path(&self) -> PathBuf {
        self.directory.join(format!("Model-v{}", self.run_id))
    }

    /// Artifact written after a completed run, without the recorder's file extension.
    pub fn final_model_path(&self) -> PathBuf {
        self.directory.join(format!("Model-v{}-Final", self.run_id))
    }

    pub fn model_config_path(&self) -> PathBuf {
        self.directory.join("model_config.json")
    }

    pub fn run_config_path(&self) -> PathBuf {
        self.directory.join("speculo_config.json")
    }

    pub fn dataset_preview_path(&self) -> PathBuf {
        self.img_dir().join("dataset.png")
    }

    pub fn epoch_predictions_path(&self, epoch: usize) -> PathBuf {
        self.img_dir().join(format!("predictions-epoch-{epoch}.png"))
    }

    pub fn predictions_path(&self) -> PathBuf {
        self.img_dir().join("predictions.png")
    }

    pub fn loss_plot_path(&self) -> PathBuf {
        self.img_dir().join("loss.png")
    }

    fn write_manifest_header(&self) -> Result<(), RegistryError> {
        let s = &self.summary;
        let header = format!(
            "# Model v{}\n\
             Optimizer - {} (LR - {}) <br>\n\
             Loss Function - {} <br>\n\
             Input Shape - {} <br>\n\
             Output Shape - {} <br>\n\
             Encoding Filters - {} <br>\n\
             Decoding Filters - {} <br>\n\
             Latent Size - {} <br>\n\n",
            self.run_id,
            s.optimizer,
            s.learning_rate,
            s.loss_function,
            s.input_shape,
            s.output_shape,
            filters(&s.encoder_filters),
            filters(&s.decoder_filters),
            s.latent_size,
        );
        fs::write(self.readme_path(), header)?;
        Ok(())
    }

    /// Appends a markdown fragment to the run's README.
    pub fn append_manifest(&self, text: &str) -> Result<(), RegistryError> {
        let mut file = OpenOptions::new().append(true).open(self.readme_path())?;
        file.write_all(text.as_bytes())?;
        Ok(())
    }

    pub fn append_dataset_preview(&self) -> Result<(), RegistryError> {
        self.append_manifest("### Dataset Sample\n![DataSet](img/dataset.png)\n\n")
    }

    pub fn append_model_summary(&self, summary: &str, num_params: usize) -> Result<(), RegistryError> {
        self.append_manifest(&format!(
            "## Model Summary\n```shell script\n{summary}\nTotal params: {num_params}\n```\n\n\
             ## Training Log\n```shell script\n\n```\n\n"
        ))
    }

    /// Closing sections, written once training has ended for whatever reason.
    pub fn append_final_report(&self, with_loss_plot: bool) -> Result<(), RegistryError> {
        let mut text = String::new();
        if with_loss_plot {
            text.push_str("### Model loss\n![loss](img/loss.png)\n\n");
        }
        text.push_str("## Predictions \n![predictions](img/predictions.png)\n\n## Notes\n");
        self.append_manifest(&text)
    }
}
