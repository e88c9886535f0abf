use std::{path::Path, sync::OnceLock};

use plotters::{
    prelude::*,
    style::{FontStyle, register_font},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("The loss history is empty, no epoch finished")]
    EmptyHistory,
    #[error("Failed to draw the loss plot due to {}", .0)]
    PlotError(String),
}

/// Mean losses per finished epoch.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct LossHistory {
    pub train: Vec<f64>,
    pub valid: Vec<f64>,
}

impl LossHistory {
    pub fn push(&mut self, train: f64, valid: Option<f64>) {
        self.train.push(train);
        if let Some(valid) = valid {
            self.valid.push(valid);
        }
    }

    pub fn epochs(&self) -> usize {
        self.train.len()
    }

    pub fn is_empty(&self) -> bool {
        self.train.is_empty()
    }
}

fn plot_error<E: std::fmt::Display>(e: E) -> ReportError {
    ReportError::PlotError(e.to_string())
}

static FONT: OnceLock<Result<(), String>> = OnceLock::new();

/// Registers the bundled sans-serif face once per process.
fn register_sans_serif() -> Result<(), ReportError> {
    FONT.get_or_init(|| {
        register_font(
            "sans-serif",
            FontStyle::Normal,
            include_bytes!("../assets/DejaVuSans.ttf"),
        )
        .map_err(|_| "the bundled font is not a valid ttf".to_string())
    })
    .clone()
    .map_err(ReportError::PlotError)
}

/// Draws training loss (blue) and validation loss (red) per epoch to a png.
pub fn plot_loss(history: &LossHistory, path: &Path) -> Result<(), ReportError> {
    if history.is_empty() {
        return Err(ReportError::EmptyHistory);
    }
    register_sans_serif()?;
    let max_loss = history
        .train
        .iter()
        .chain(history.valid.iter())
        .copied()
        .filter(|l| l.is_finite())
        .fold(f64::EPSILON, f64::max);
    let last_epoch = (history.epochs().max(history.valid.len()) as f64 - 1.0).max(1.0);

    let root = BitMapBackend::new(path, (640, 480)).into_drawing_area();
    root.fill(&WHITE).map_err(plot_error)?;
    let mut chart = ChartBuilder::on(&root)
        .margin(20)
        .caption("Model loss", ("sans-serif", 24))
        .x_label_area_size(35)
        .y_label_area_size(50)
        .build_cartesian_2d(0f64..last_epoch, 0f64..max_loss * 1.05)
        .map_err(plot_error)?;

    chart
        .configure_mesh()
        .disable_mesh()
        .x_desc("Epoch")
        .y_desc("Loss")
        .draw()
        .map_err(plot_error)?;
    chart
        .draw_series(LineSeries::new(
            history.train.iter().enumerate().map(|(e, l)| (e as f64, *l)),
            BLUE.stroke_width(2),
        ))
        .map_err(plot_error)?
        .label("Train")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], BLUE));
    chart
        .draw_series(LineSeries::new(
            history.valid.iter().enumerate().map(|(e, l)| (e as f64, *l)),
            RED.stroke_width(2),
        ))
        .map_err(plot_error)?
        .label("Test")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], RED));
    chart
        .configure_series_labels()
        .position(SeriesLabelPosition::UpperRight)
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()
        .map_err(plot_error)?;
    root.present().map_err(plot_error)?;
    Ok(())
}
