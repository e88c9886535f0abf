use image::DynamicImage;
use rerun::{RecordingStream, external::ndarray};

#[derive(thiserror::Error, Debug, Clone)]
pub enum LogConversionError {
    #[error("Failed to arrange pixels as [{}, {}, {}] due to {}", .0, .1, .2, .3)]
    ShapeError(usize, usize, usize, String),
    #[error("failed to convert from image due to {}", .0)]
    ImageConstructionError(String),
}

/// Converts a rendered picture into a rerun image, keeping grayscale pictures single channel.
pub fn to_rerun_image(picture: &DynamicImage) -> Result<rerun::Image, LogConversionError> {
    let (width, height) = (picture.width() as usize, picture.height() as usize);
    let (color_model, channels, pixels) = match picture {
        DynamicImage::ImageLuma8(gray) => (rerun::ColorModel::L, 1, gray.as_raw().clone()),
        other => (rerun::ColorModel::RGB, 3, other.to_rgb8().into_raw()),
    };
    let nd = ndarray::Array3::<u8>::from_shape_vec((height, width, channels), pixels)
        .map_err(|e| LogConversionError::ShapeError(height, width, channels, e.to_string()))?;
    rerun::Image::from_color_model_and_tensor(color_model, nd)
        .map_err(|e| LogConversionError::ImageConstructionError(format!("{:?}", e)))
}

/// Streams run telemetry (losses, previews, snapshots, notices) to a rerun recording.
#[derive(Clone)]
pub struct SpeculoLogger {
    stream: RecordingStream,
}

impl SpeculoLogger {
    pub fn new(stream: RecordingStream) -> Self {
        Self { stream }
    }

    /// Logger whose stream drops everything.
    pub fn disabled() -> Self {
        Self::new(RecordingStream::disabled())
    }

    pub fn log_batch_loss(&self, step: usize, loss: f64) {
        self.stream.set_time_sequence("step", step as i64);
        let _ = self
            .stream
            .log("graphs/loss/training/batch", &rerun::Scalar::new(loss));
    }

    pub fn log_epoch(&self, epoch: usize, train_loss: f64, valid_loss: Option<f64>) {
        self.stream.set_time_sequence("epoch", epoch as i64);
        let _ = self
            .stream
            .log("graphs/loss/training/mean", &rerun::Scalar::new(train_loss));
        if let Some(valid_loss) = valid_loss {
            let _ = self
                .stream
                .log("graphs/loss/validation/mean", &rerun::Scalar::new(valid_loss));
        }
    }

    pub fn log_picture(&self, entity: &str, picture: &DynamicImage) {
        match to_rerun_image(picture) {
            Ok(image) => {
                let _ = self.stream.log(format!("images/{entity}"), &image);
            }
            Err(e) => {
                let _ = self.stream.log(
                    format!("images/{entity}"),
                    &rerun::TextLog::new(format!("Failed to convert {entity} due to {e}"))
                        .with_level(rerun::TextLogLevel::ERROR),
                );
            }
        }
    }

    pub fn log_notice(&self, entity: &str, text: &str) {
        let _ = self.stream.log(
            format!("notices/{entity}"),
            &rerun::TextLog::new(text.to_string()).with_level(rerun::TextLogLevel::WARN),
        );
    }
}
