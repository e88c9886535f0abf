use std::path::{Path, PathBuf};

use burn::{
    config::{Config, ConfigError},
    module::Module,
    prelude::Backend,
    record::{CompactRecorder, RecorderError},
    tensor::Tensor,
};
use log::{debug, info};
use thiserror::Error;

use crate::{
    face_database::{
        face_batcher::stack_images,
        face_dataset::{FaceDatasetError, sorted_children},
        face_image::{FaceImage, ImageError, ImageShape, PixelImage, denormalize, read_image},
    },
    registry::RunRecord,
    util::{ComparisonGrid, GridError},
};

use super::autoencoder::{ShapeError, SpeculoAutoencoder, SpeculoAutoencoderConfig};

/// Images per row of an evaluation grid.
pub const GRID_COLUMNS: usize = 10;
const PREDICTION_CHUNK: usize = 16;

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("Failed to read image due to {0}")]
    ImageError(#[from] ImageError),
    #[error("Failed to list the evaluate set due to {0}")]
    DatasetError(#[from] FaceDatasetError),
    #[error("Failed to build the comparison grid due to {0}")]
    GridError(#[from] GridError),
    #[error("Failed to load SpeculoAutoencoderConfig due to: {0}")]
    ModelConfigDeserializationError(#[from] ConfigError),
    #[error("Failed to load model weights due to: {0}")]
    ModelWeightsDeserializationError(#[from] RecorderError),
    #[error("Invalid model configuration: {0}")]
    ShapeError(#[from] ShapeError),
    #[error("Failed to read the model output due to {0}")]
    TensorConversionError(String),
    #[error("The evaluate set in {} contains no images", .0.display())]
    EmptyEvaluateSet(PathBuf),
    #[error("The model expects inputs of {} but got {}", .expected, .actual)]
    InputShapeMismatch {
        expected: ImageShape,
        actual: ImageShape,
    },
}

/// The two contracts of [`Inference::predict`].
#[derive(Debug, Clone, PartialEq)]
pub enum Prediction {
    /// Output denormalized to `0..=255` at the declared output shape.
    Preview(PixelImage),
    /// Flattened network output in `[H, W, C]` order, not rescaled.
    Raw(Vec<f32>),
}

fn tensor_to_vec<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<Vec<f32>, InferenceError> {
    tensor
        .into_data()
        .to_vec::<f32>()
        .map_err(|e| InferenceError::TensorConversionError(format!("{:?}", e)))
}

fn check_input(image: &FaceImage, expected: ImageShape) -> Result<(), InferenceError> {
    if image.shape() != expected {
        return Err(InferenceError::InputShapeMismatch {
            expected,
            actual: image.shape(),
        });
    }
    Ok(())
}

/// Runs `images` through `model`, returning one `[H, W, C]` output per input. Every image must
/// have `input_shape`.
pub fn predict_images<B: Backend>(
    model: &SpeculoAutoencoder<B>,
    images: &[FaceImage],
    (input_shape, output_shape): (ImageShape, ImageShape),
    device: &B::Device,
) -> Result<Vec<FaceImage>, InferenceError> {
    for image in images {
        check_input(image, input_shape)?;
    }
    let mut outputs = Vec::with_capacity(images.len());
    for chunk in images.chunks(PREDICTION_CHUNK) {
        let input = stack_images::<B>(chunk.iter(), device);
        let output = model.forward(input).permute([0, 2, 3, 1]);
        let values = tensor_to_vec(output)?;
        for pixels in values.chunks(output_shape.len()) {
            outputs.push(FaceImage::new(pixels.to_vec(), output_shape)?);
        }
    }
    Ok(outputs)
}

/// Fixed evaluation set, read once in sorted file order and reused for every snapshot.
#[derive(Debug, Clone)]
pub struct Evaluator {
    evaluate_dir: PathBuf,
    input_shape: ImageShape,
    output_shape: ImageShape,
    images: Option<Vec<FaceImage>>,
}

impl Evaluator {
    pub fn new(evaluate_dir: impl Into<PathBuf>, input_shape: ImageShape, output_shape: ImageShape) -> Self {
        Self {
            evaluate_dir: evaluate_dir.into(),
            input_shape,
            output_shape,
            images: None,
        }
    }

    pub fn images(&mut self) -> Result<&[FaceImage], InferenceError> {
        if self.images.is_none() {
            let mut images = vec![];
            for path in sorted_children(&self.evaluate_dir, false)? {
                images.push(read_image(&path, self.input_shape)?);
            }
            if images.is_empty() {
                return Err(InferenceError::EmptyEvaluateSet(self.evaluate_dir.clone()));
            }
            debug!("loaded {} evaluation images", images.len());
            self.images = Some(images);
        }
        Ok(self.images.as_deref().unwrap_or_default())
    }

    /// Predicts every evaluation image and lays inputs and outputs out in alternating rows of
    /// ten. The grid is written to `destination` when one is given.
    pub fn evaluate<B: Backend>(
        &mut self,
        model: &SpeculoAutoencoder<B>,
        device: &B::Device,
        title: &str,
        destination: Option<&Path>,
    ) -> Result<ComparisonGrid, InferenceError> {
        let shapes = (self.input_shape, self.output_shape);
        let images = self.images()?;
        let originals: Vec<PixelImage> = images.iter().map(denormalize).collect();
        let generated: Vec<PixelImage> = predict_images(model, images, shapes, device)?
            .iter()
            .map(denormalize)
            .collect();

        let split = GRID_COLUMNS.min(originals.len());
        let grid = ComparisonGrid::new(title)
            .with_row("input", originals[..split].to_vec())
            .with_row("output", generated[..split].to_vec())
            .with_row("input", originals[split..].to_vec())
            .with_row("output", generated[split..].to_vec());
        if let Some(destination) = destination {
            grid.save(destination)?;
            info!("{title} saved to {}", destination.display());
        }
        Ok(grid)
    }
}

/// Loads a persisted model on first use and keeps it resident for later calls.
pub struct Inference<B: Backend> {
    model_config: SpeculoAutoencoderConfig,
    model_path: PathBuf,
    device: B::Device,
    model: Option<SpeculoAutoencoder<B>>,
    evaluator: Evaluator,
}

impl<B: Backend> Inference<B> {
    pub fn new(
        model_config: SpeculoAutoencoderConfig,
        model_path: impl Into<PathBuf>,
        evaluate_dir: impl Into<PathBuf>,
        device: B::Device,
    ) -> Self {
        let evaluator = Evaluator::new(
            evaluate_dir,
            model_config.input_shape,
            model_config.output_shape,
        );
        Self {
            model_config,
            model_path: model_path.into(),
            device,
            model: None,
            evaluator,
        }
    }

    /// Inference over the best-loss artifact of a run, or over its final artifact.
    pub fn from_run(
        record: &RunRecord,
        final_model: bool,
        evaluate_dir: impl Into<PathBuf>,
        device: B::Device,
    ) -> Result<Self, InferenceError> {
        let model_config = SpeculoAutoencoderConfig::load(record.model_config_path())?;
        let model_path = if final_model {
            record.final_model_path()
        } else {
            record.checkpoint_path()
        };
        Ok(Self::new(model_config, model_path, evaluate_dir, device))
    }

    /// Makes `model` resident; nothing is read from disk afterwards.
    pub fn with_model(mut self, model: SpeculoAutoencoder<B>) -> Self {
        self.model = Some(model);
        self
    }

    pub fn is_loaded(&self) -> bool {
        self.model.is_some()
    }

    pub fn model_config(&self) -> &SpeculoAutoencoderConfig {
        &self.model_config
    }

    fn load(&self) -> Result<SpeculoAutoencoder<B>, InferenceError> {
        info!("loading model from {}", self.model_path.display());
        Ok(self
            .model_config
            .init::<B>(&self.device)?
            .load_file(&self.model_path, &CompactRecorder::new(), &self.device)?)
    }

    fn loaded_model(&mut self) -> Result<&SpeculoAutoencoder<B>, InferenceError> {
        let model = match self.model.take() {
            Some(model) => model,
            None => self.load()?,
        };
        Ok(self.model.insert(model))
    }

    /// Feeds one normalized input through the network. `preview` selects the denormalized
    /// image contract, otherwise the raw flattened output is returned.
    pub fn predict(&mut self, image: &FaceImage, preview: bool) -> Result<Prediction, InferenceError> {
        check_input(image, self.model_config.input_shape)?;
        let shapes = (self.model_config.input_shape, self.model_config.output_shape);
        let device = self.device.clone();
        let model = self.loaded_model()?;
        let mut outputs = predict_images(model, std::slice::from_ref(image), shapes, &device)?;
        let output = outputs
            .pop()
            .ok_or_else(|| InferenceError::TensorConversionError("no output produced".into()))?;
        if preview {
            Ok(Prediction::Preview(denormalize(&output)))
        } else {
            Ok(Prediction::Raw(output.pixels().to_vec()))
        }
    }

    /// Latent vector the encoder produces for `image`.
    pub fn latent(&mut self, image: &FaceImage) -> Result<Vec<f32>, InferenceError> {
        check_input(image, self.model_config.input_shape)?;
        let device = self.device.clone();
        let model = self.loaded_model()?;
        let input = stack_images::<B>(std::iter::once(image), &device);
        tensor_to_vec(model.encode(input))
    }

    pub fn evaluate(&mut self, title: &str, destination: Option<&Path>) -> Result<ComparisonGrid, InferenceError> {
        let model = match self.model.take() {
            Some(model) => model,
            None => self.load()?,
        };
        let model = &*self.model.insert(model);
        self.evaluator.evaluate(model, &self.device, title, destination)
    }
}
