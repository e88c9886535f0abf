use std::path::PathBuf;

use burn::prelude::Backend;
use log::{info, warn};

use crate::{logging::SpeculoLogger, registry::RunRecord};

use super::{autoencoder::SpeculoAutoencoder, inference::Evaluator};

/// Events the training loop reports to its handlers.
pub enum TrainingEvent<'a, B: Backend> {
    EpochEnded {
        /// 1-based
        epoch: usize,
        model: &'a SpeculoAutoencoder<B>,
        device: &'a B::Device,
        train_loss: f64,
        valid_loss: Option<f64>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookAction {
    Continue,
    /// Finish the current epoch, then leave the training loop.
    Stop,
}

pub type TrainingHook<'h, B> = Box<dyn FnMut(&TrainingEvent<'_, B>) -> HookAction + 'h>;

/// Handlers registered for [`TrainingEvent`]s, called in registration order.
pub struct TrainingHooks<'h, B: Backend> {
    handlers: Vec<TrainingHook<'h, B>>,
}

impl<B: Backend> Default for TrainingHooks<'_, B> {
    fn default() -> Self {
        Self { handlers: vec![] }
    }
}

impl<'h, B: Backend> TrainingHooks<'h, B> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, handler: F)
    where
        F: FnMut(&TrainingEvent<'_, B>) -> HookAction + 'h,
    {
        self.handlers.push(Box::new(handler));
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Delivers `event` to every handler; any `Stop` wins.
    pub fn dispatch(&mut self, event: &TrainingEvent<'_, B>) -> HookAction {
        let mut action = HookAction::Continue;
        for handler in self.handlers.iter_mut() {
            if handler(event) == HookAction::Stop {
                action = HookAction::Stop;
            }
        }
        action
    }
}

/// Renders predictions over the evaluation set every `every` epochs and watches for the
/// stop sentinel file.
pub struct ProgressSnapshotter {
    every: usize,
    stop_file: PathBuf,
    evaluator: Evaluator,
    record: RunRecord,
    logger: SpeculoLogger,
}

impl ProgressSnapshotter {
    pub fn new(
        every: usize,
        stop_file: impl Into<PathBuf>,
        evaluator: Evaluator,
        record: RunRecord,
        logger: SpeculoLogger,
    ) -> Self {
        Self {
            every: every.max(1),
            stop_file: stop_file.into(),
            evaluator,
            record,
            logger,
        }
    }

    pub fn handle<B: Backend>(&mut self, event: &TrainingEvent<'_, B>) -> HookAction {
        let TrainingEvent::EpochEnded {
            epoch,
            model,
            device,
            ..
        } = event;

        if epoch % self.every == 0 {
            let destination = self.record.epoch_predictions_path(*epoch);
            let title = format!("Model Predictions on epoch {epoch}");
            match self.evaluator.evaluate(*model, *device, &title, None) {
                Ok(grid) => match grid.render() {
                    Ok(picture) => {
                        if let Err(e) = picture.save(&destination) {
                            warn!("failed to write {}: {e}", destination.display());
                        }
                        self.logger
                            .log_picture(&format!("predictions/epoch_{epoch}"), &picture);
                    }
                    Err(e) => warn!("failed to render snapshot for epoch {epoch}: {e}"),
                },
                Err(e) => warn!("skipping snapshot for epoch {epoch}: {e}"),
            }
        }

        if self.stop_file.is_file() {
            let notice = format!(
                "Stopping training because {} was found",
                self.stop_file.display()
            );
            info!("{notice}");
            self.logger.log_notice("training", &notice);
            return HookAction::Stop;
        }
        HookAction::Continue
    }
}
