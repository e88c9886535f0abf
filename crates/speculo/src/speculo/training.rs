use std::{
    io,
    sync::atomic::{AtomicBool, Ordering},
};

use burn::{
    config::{Config, ConfigError},
    data::dataloader::{DataLoader, DataLoaderBuilder, batcher::Batcher},
    module::{AutodiffModule, Module},
    nn::loss::{MseLoss, Reduction},
    optim::{GradientsParams, Optimizer},
    prelude::Backend,
    record::{CompactRecorder, RecorderError},
    tensor::{Tensor, backend::AutodiffBackend, cast::ToElement},
};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use log::{info, warn};
use thiserror::Error;

use crate::{
    config::{
        LossFunction, ModelProvider, OptimizerConfig, SettingError, SpeculoConfig,
        TrainDataConfig,
    },
    face_database::{
        face_batcher::{FaceBatch, FaceBatcher, sample_preview, to_batches},
        face_dataset::{EagerFaceDataset, FaceDatasetError, SamplePair},
        face_index::{LazyFaceDataset, pair_lazy},
    },
    logging::SpeculoLogger,
    registry::{RegistryError, RunRecord, RunRegistry, RunSummary},
    report::{LossHistory, ReportError, plot_loss},
    util::{ComparisonGrid, GridError},
};

use super::{
    autoencoder::{ShapeError, SpeculoAutoencoder, SpeculoAutoencoderConfig},
    inference::{Evaluator, Inference, InferenceError},
    progress::{HookAction, ProgressSnapshotter, TrainingEvent, TrainingHooks},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainingState {
    Init,
    DatasetReady,
    Training,
    Completed,
    Interrupted,
    Reported,
}

#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
    #[error("Invalid training settings: {0}")]
    SettingError(#[from] SettingError),
    #[error("Run registry error: {0}")]
    RegistryError(#[from] RegistryError),
    #[error("Dataset error: {0}")]
    DatasetError(#[from] FaceDatasetError),
    #[error("Invalid model configuration: {0}")]
    ShapeError(#[from] ShapeError),
    #[error("Failed to load or save a config due to: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("Failed to load or save model weights due to: {0}")]
    RecorderError(#[from] RecorderError),
    #[error("Evaluation failed: {0}")]
    InferenceError(#[from] InferenceError),
    #[error("Report failed: {0}")]
    ReportError(#[from] ReportError),
    #[error("Preview failed: {0}")]
    GridError(#[from] GridError),
    #[error("The {} set yields no decodable pairs", .0)]
    EmptyDataset(String),
}

/// Result of a run that reached the reporting step.
pub struct TrainingOutcome<B: Backend> {
    pub record: RunRecord,
    /// Every state the run passed through, ending in [`TrainingState::Reported`].
    pub states: Vec<TrainingState>,
    pub history: LossHistory,
    pub best_loss: Option<f64>,
    pub evaluation: ComparisonGrid,
    pub model: SpeculoAutoencoder<B>,
}

impl<B: Backend> TrainingOutcome<B> {
    /// `Completed` or `Interrupted`.
    pub fn exit_state(&self) -> Option<TrainingState> {
        self.states
            .iter()
            .rev()
            .find(|s| matches!(s, TrainingState::Completed | TrainingState::Interrupted))
            .copied()
    }
}

struct StateMachine {
    states: Vec<TrainingState>,
}

impl StateMachine {
    fn new() -> Self {
        info!("state: {:?}", TrainingState::Init);
        Self {
            states: vec![TrainingState::Init],
        }
    }

    fn advance(&mut self, next: TrainingState) {
        info!("state: {:?} -> {:?}", self.states.last(), next);
        self.states.push(next);
    }
}

enum TrainSource {
    Eager(EagerFaceDataset),
    Lazy(LazyFaceDataset),
}

impl TrainSource {
    fn open(
        config: &SpeculoConfig,
        model_config: &SpeculoAutoencoderConfig,
    ) -> Result<Self, FaceDatasetError> {
        let (input_shape, output_shape) = (model_config.input_shape, model_config.output_shape);
        Ok(match &config.train_data {
            TrainDataConfig::Directory { path } => TrainSource::Eager(EagerFaceDataset::load(
                path,
                input_shape,
                output_shape,
                config.seed,
            )?),
            TrainDataConfig::Index { index_file } => {
                TrainSource::Lazy(pair_lazy(index_file, input_shape, output_shape)?)
            }
        })
    }

    fn len(&self) -> usize {
        match self {
            TrainSource::Eager(data) => data.pairs().len(),
            TrainSource::Lazy(data) => data.len(),
        }
    }

    /// One pass over the training pairs.
    fn pass(&self) -> Box<dyn Iterator<Item = SamplePair> + '_> {
        match self {
            TrainSource::Eager(data) => Box::new(data.pairs().iter().cloned()),
            TrainSource::Lazy(data) => Box::new(data.iter()),
        }
    }

    /// Repeating stream over the training pairs.
    fn stream(&self) -> Box<dyn Iterator<Item = SamplePair> + '_> {
        match self {
            TrainSource::Eager(data) => Box::new(data.pairs().iter().cloned().cycle()),
            TrainSource::Lazy(data) => Box::new(data.stream()),
        }
    }
}

fn reconstruction_loss<B: Backend>(
    loss_function: LossFunction,
    output: Tensor<B, 4>,
    target: Tensor<B, 4>,
) -> Tensor<B, 1> {
    match loss_function {
        LossFunction::Mse => MseLoss::new().forward(output, target, Reduction::Mean),
        LossFunction::Mae => (output - target).abs().mean(),
    }
}

fn resolve_model_config(provider: &ModelProvider) -> Result<SpeculoAutoencoderConfig, ConfigError> {
    match provider {
        ModelProvider::Config(config) => Ok(config.clone()),
        ModelProvider::Checkpoint { config_path, .. } => SpeculoAutoencoderConfig::load(config_path),
    }
}

fn run_summary(config: &SpeculoConfig, model_config: &SpeculoAutoencoderConfig) -> RunSummary {
    RunSummary {
        optimizer: config.optimizer.to_string(),
        loss_function: config.loss_function.to_string(),
        learning_rate: config.learning_rate,
        input_shape: model_config.input_shape,
        output_shape: model_config.output_shape,
        encoder_filters: model_config.encoder_filters.clone(),
        decoder_filters: model_config.decoder_filters.clone(),
        latent_size: model_config.latent_size,
    }
}

/// Mean loss over `steps` validation batches, restarting `loader` as often as needed. Stops
/// early once `interrupt` is set. `None` when no batch was evaluated.
fn validation_loss<B: Backend>(
    model: &SpeculoAutoencoder<B>,
    loader: &dyn DataLoader<FaceBatch<B>>,
    steps: usize,
    loss_function: LossFunction,
    interrupt: &AtomicBool,
    bar: &ProgressBar,
) -> Option<f64> {
    let mut total = 0.0;
    let mut count = 0;
    'passes: while count < steps {
        let mut in_pass = 0;
        for batch in loader.iter() {
            if interrupt.load(Ordering::Relaxed) {
                break 'passes;
            }
            let output = model.forward(batch.inputs);
            let loss = reconstruction_loss(loss_function, output, batch.targets);
            total += loss.into_scalar().to_f64();
            count += 1;
            in_pass += 1;
            bar.inc(1);
            if count == steps {
                break 'passes;
            }
        }
        if in_pass == 0 {
            break;
        }
    }
    (count > 0).then(|| total / count as f64)
}

fn progress_style() -> ProgressStyle {
    ProgressStyle::with_template("[{elapsed_precise}] {bar:40.cyan/blue} {pos:>7}/{len:7} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("##-")
}

struct EarlyStopping {
    patience: usize,
    min_delta: f64,
    best: Option<f64>,
    wait: usize,
}

impl EarlyStopping {
    /// Returns true once the monitored loss failed to improve for `patience` epochs.
    fn should_stop(&mut self, loss: f64) -> bool {
        match self.best {
            Some(best) if loss >= best - self.min_delta => self.wait += 1,
            _ => {
                self.best = Some(loss);
                self.wait = 0;
            }
        }
        self.wait >= self.patience
    }
}

/// Everything the epoch loop needs besides the model and optimizer.
struct Fit<'a, 'h, B: AutodiffBackend> {
    config: &'a SpeculoConfig,
    record: &'a RunRecord,
    device: &'a B::Device,
    log: &'a SpeculoLogger,
    interrupt: &'a AtomicBool,
    hooks: &'a mut TrainingHooks<'h, B::InnerBackend>,
    history: LossHistory,
    best_loss: Option<f64>,
}

impl<B: AutodiffBackend> Fit<'_, '_, B> {
    /// Runs the epoch loop. The model is handed back even when the loop fails so the report
    /// can still be produced from it.
    fn run<O: Optimizer<SpeculoAutoencoder<B>, B>>(
        &mut self,
        mut model: SpeculoAutoencoder<B>,
        mut optimizer: O,
        train: &TrainSource,
        valid: &EagerFaceDataset,
    ) -> (SpeculoAutoencoder<B>, Result<TrainingState, TrainingError>) {
        let config = self.config;
        let num_epochs = config.epochs_for(train.len());
        let steps_per_epoch = config.steps_per_epoch();
        info!(
            "training for {num_epochs} epochs of {steps_per_epoch} steps on {} pairs",
            train.len()
        );

        let batcher_train = FaceBatcher::<B>::new(self.device.clone());
        let batcher_valid = FaceBatcher::<B::InnerBackend>::new(self.device.clone());
        let mut train_batches = to_batches(train.stream(), config.batch_size);
        let dataloader_valid = DataLoaderBuilder::new(batcher_valid)
            .batch_size(config.batch_size)
            .build(valid.clone());
        let mut early_stopping = config.early_stopping.as_ref().map(|e| EarlyStopping {
            patience: e.patience,
            min_delta: e.min_delta,
            best: None,
            wait: 0,
        });

        let m = MultiProgress::new();
        let sty = progress_style();
        let epoch_bar = m.add(ProgressBar::new(num_epochs as u64));
        epoch_bar.set_style(sty.clone());
        epoch_bar.set_message("Epochs");

        let mut step = 0;
        for epoch in 1..num_epochs + 1 {
            epoch_bar.inc(1);
            let training_bar = m.add(ProgressBar::new(steps_per_epoch as u64));
            training_bar.set_style(sty.clone());
            training_bar.set_message("Training Progress");

            let mut epoch_loss = 0.0;
            let mut epoch_steps = 0;
            for _ in 0..steps_per_epoch {
                if self.interrupt.load(Ordering::Relaxed) {
                    m.remove(&training_bar);
                    warn!("training interrupted during epoch {epoch}");
                    return (model, Ok(TrainingState::Interrupted));
                }
                let Some(items) = train_batches.next() else {
                    m.remove(&training_bar);
                    return (model, Err(TrainingError::EmptyDataset("training".into())));
                };
                let batch = batcher_train.batch(items);
                let output = model.forward(batch.inputs);
                let loss = reconstruction_loss(config.loss_function, output, batch.targets);
                let loss_value = loss.clone().into_scalar().to_f64();

                let grads = GradientsParams::from_grads(loss.backward(), &model);
                model = optimizer.step(config.learning_rate, model, grads);

                step += 1;
                epoch_loss += loss_value;
                epoch_steps += 1;
                self.log.log_batch_loss(step, loss_value);
                training_bar.inc(1);
            }
            m.remove(&training_bar);
            let train_loss = epoch_loss / epoch_steps.max(1) as f64;

            let model_valid = model.valid();
            let valid_loss = self.validate(&model_valid, &*dataloader_valid, &m);
            self.history.push(train_loss, valid_loss);
            self.log.log_epoch(epoch, train_loss, valid_loss);
            info!(
                "Epoch {epoch}/{num_epochs} - loss: {train_loss:.5} - val_loss: {}",
                valid_loss.map_or("n/a".to_string(), |l| format!("{l:.5}"))
            );

            if self.best_loss.is_none_or(|best| train_loss < best) {
                info!(
                    "loss improved from {:?} to {train_loss:.5}, saving model to {}",
                    self.best_loss,
                    self.record.checkpoint_path().display()
                );
                if let Err(e) = model
                    .clone()
                    .save_file(self.record.checkpoint_path(), &CompactRecorder::new())
                {
                    return (model, Err(e.into()));
                }
                self.best_loss = Some(train_loss);
            }
            if self.interrupt.load(Ordering::Relaxed) {
                warn!("training interrupted while validating epoch {epoch}");
                return (model, Ok(TrainingState::Interrupted));
            }

            let event = TrainingEvent::EpochEnded {
                epoch,
                model: &model_valid,
                device: self.device,
                train_loss,
                valid_loss,
            };
            let mut stop = self.hooks.dispatch(&event) == HookAction::Stop;

            if let (Some(early), Some(valid_loss)) = (early_stopping.as_mut(), valid_loss) {
                if early.should_stop(valid_loss) {
                    info!("early stopping after epoch {epoch}, val_loss stopped improving");
                    stop = true;
                }
            }
            if stop {
                break;
            }
        }
        epoch_bar.finish();
        (model, Ok(TrainingState::Completed))
    }

    fn validate(
        &self,
        model: &SpeculoAutoencoder<B::InnerBackend>,
        loader: &dyn DataLoader<FaceBatch<B::InnerBackend>>,
        m: &MultiProgress,
    ) -> Option<f64> {
        let steps = self.config.validation_steps;
        let valid_bar = m.add(ProgressBar::new(steps as u64));
        valid_bar.set_style(progress_style());
        valid_bar.set_message("Valid Progress");

        let loss = validation_loss(
            model,
            loader,
            steps,
            self.config.loss_function,
            self.interrupt,
            &valid_bar,
        );
        m.remove(&valid_bar);
        loss
    }
}

/// Trains one run end to end: registers the run directory, prepares both datasets, fits the
/// autoencoder and always finishes with the loss plot, the manifest and a final evaluation.
///
/// `interrupt` is polled before every optimization step and between validation batches; once
/// set the run is reported as interrupted. `hooks` receive an event at the end of every epoch,
/// in addition to the built-in progress snapshotter.
pub fn train<'h, B: AutodiffBackend>(
    config: SpeculoConfig,
    device: B::Device,
    log: SpeculoLogger,
    interrupt: &AtomicBool,
    mut hooks: TrainingHooks<'h, B::InnerBackend>,
) -> Result<TrainingOutcome<B::InnerBackend>, TrainingError> {
    let mut machine = StateMachine::new();

    config.check()?;
    let model_config = resolve_model_config(&config.model)?;
    model_config.check_shapes()?;
    let record = RunRegistry::new(&config.models_dir).start_run(run_summary(&config, &model_config))?;
    config.save(record.run_config_path())?;
    model_config.save(record.model_config_path())?;

    B::seed(config.seed);
    let mut model = model_config.init::<B>(&device)?;
    if let ModelProvider::Checkpoint {
        checkpoint_path, ..
    } = &config.model
    {
        info!("resuming from {}", checkpoint_path.display());
        model = model.load_file(checkpoint_path, &CompactRecorder::new(), &device)?;
    }

    let train_data = TrainSource::open(&config, &model_config)?;
    let valid_data = EagerFaceDataset::load(
        &config.validation_dir,
        model_config.input_shape,
        model_config.output_shape,
        config.seed,
    )?;
    if train_data.len() == 0 {
        return Err(TrainingError::EmptyDataset("training".into()));
    }
    if config.visualize {
        let train_preview = sample_preview(train_data.pass(), config.preview_samples);
        let valid_preview = sample_preview(valid_data.pairs().iter().cloned(), config.preview_samples);
        let (x_train, y_train) = train_preview.into_iter().map(|s| (s.input, s.target)).unzip();
        let (x_test, y_test) = valid_preview.into_iter().map(|s| (s.input, s.target)).unzip();
        let picture = ComparisonGrid::new(format!("Dataset ({})", train_data.len()))
            .with_row("x_train", x_train)
            .with_row("y_train", y_train)
            .with_row("x_test", x_test)
            .with_row("y_test", y_test)
            .save(&record.dataset_preview_path())?;
        log.log_picture("dataset", &picture);
        record.append_dataset_preview()?;
    }
    record.append_model_summary(&model.to_string(), model.num_params())?;
    machine.advance(TrainingState::DatasetReady);

    let snapshot_evaluator = Evaluator::new(
        &config.evaluate_dir,
        model_config.input_shape,
        model_config.output_shape,
    );
    let mut snapshotter = ProgressSnapshotter::new(
        config.snapshot_every,
        &config.stop_file,
        snapshot_evaluator,
        record.clone(),
        log.clone(),
    );
    hooks.register(move |event| snapshotter.handle(event));

    machine.advance(TrainingState::Training);
    let mut fit = Fit::<B> {
        config: &config,
        record: &record,
        device: &device,
        log: &log,
        interrupt,
        hooks: &mut hooks,
        history: LossHistory::default(),
        best_loss: None,
    };
    let (model, fit_result) = match &config.optimizer {
        OptimizerConfig::Adam(c) => {
            let optim = c.init::<B, SpeculoAutoencoder<B>>();
            fit.run(model, optim, &train_data, &valid_data)
        }
        OptimizerConfig::AdaGrad(c) => {
            let optim = c.init::<B, SpeculoAutoencoder<B>>();
            fit.run(model, optim, &train_data, &valid_data)
        }
        OptimizerConfig::RmsProp(c) => {
            let optim = c.init::<B, SpeculoAutoencoder<B>>();
            fit.run(model, optim, &train_data, &valid_data)
        }
        OptimizerConfig::Sgd(c) => {
            let optim = c.init::<B, SpeculoAutoencoder<B>>();
            fit.run(model, optim, &train_data, &valid_data)
        }
    };
    let history = fit.history;
    let best_loss = fit.best_loss;

    let fit_result = match fit_result {
        Ok(TrainingState::Completed) => {
            machine.advance(TrainingState::Completed);
            model
                .clone()
                .save_file(record.final_model_path(), &CompactRecorder::new())
                .map(|_| ())
                .map_err(TrainingError::from)
        }
        Ok(state) => {
            machine.advance(state);
            Ok(())
        }
        Err(e) => Err(e),
    };

    // Reporting runs no matter how training ended.
    let with_loss_plot = !history.is_empty();
    if with_loss_plot {
        plot_loss(&history, &record.loss_plot_path())?;
    }
    record.append_final_report(with_loss_plot)?;
    let model = model.valid();
    let mut inference = Inference::new(
        model_config,
        record.checkpoint_path(),
        &config.evaluate_dir,
        device,
    )
    .with_model(model.clone());
    let predictions_path = record.predictions_path();
    let evaluation = inference.evaluate("Model Predictions", Some(predictions_path.as_path()))?;
    if let Ok(picture) = evaluation.render() {
        log.log_picture("predictions", &picture);
    }
    machine.advance(TrainingState::Reported);
    fit_result?;

    Ok(TrainingOutcome {
        record,
        states: machine.states,
        history,
        best_loss,
        evaluation,
        model,
    })
}
