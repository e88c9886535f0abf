use burn::{
    config::Config,
    module::Module,
    nn::{
        BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Linear, LinearConfig,
        PaddingConfig2d, Relu, Sigmoid,
        conv::{Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig},
        pool::{MaxPool2d, MaxPool2dConfig},
    },
    prelude::Backend,
    tensor::Tensor,
};
use thiserror::Error;

use crate::face_database::face_image::ImageShape;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ShapeError {
    #[error("The encoder reduces {} to zero size with {} pooling stages", .0, .1)]
    EncoderTooDeep(ImageShape, usize),
    #[error("The decoder produces {} but the declared output shape is {}", .decoded, .declared)]
    ShapeMismatch {
        decoded: ImageShape,
        declared: ImageShape,
    },
}

#[derive(Config, Debug)]
pub struct SpeculoAutoencoderConfig {
    #[config(default = "ImageShape::new(128, 128, 1)")]
    pub input_shape: ImageShape,
    #[config(default = "ImageShape::new(32, 32, 1)")]
    pub output_shape: ImageShape,
    /// Each entry adds a 3x3 conv and a 2x2 max pool, halving the resolution.
    #[config(default = "vec![1024, 1024, 512, 256, 128, 64]")]
    pub encoder_filters: Vec<usize>,
    /// Each entry adds a stride 2 transposed conv, doubling the resolution.
    #[config(default = "vec![64, 128, 256, 512]")]
    pub decoder_filters: Vec<usize>,
    #[config(default = 2048)]
    pub latent_size: usize,
    #[config(default = 0.2)]
    pub dropout: f64,
}

impl SpeculoAutoencoderConfig {
    /// `(channels, height, width)` of the feature map entering the latent layer.
    pub fn encoded_shape(&self) -> Result<ImageShape, ShapeError> {
        let stages = self.encoder_filters.len();
        let height = self.input_shape.height >> stages;
        let width = self.input_shape.width >> stages;
        if height == 0 || width == 0 {
            return Err(ShapeError::EncoderTooDeep(self.input_shape, stages));
        }
        let channels = self
            .encoder_filters
            .last()
            .copied()
            .unwrap_or(self.input_shape.channels);
        Ok(ImageShape::new(height, width, channels))
    }

    /// Shape the decoder actually produces for the configured filter stacks.
    pub fn decoded_shape(&self) -> Result<ImageShape, ShapeError> {
        let encoded = self.encoded_shape()?;
        let stages = self.decoder_filters.len();
        Ok(ImageShape::new(
            encoded.height << stages,
            encoded.width << stages,
            self.output_shape.channels,
        ))
    }

    pub fn check_shapes(&self) -> Result<(), ShapeError> {
        let decoded = self.decoded_shape()?;
        if decoded != self.output_shape {
            return Err(ShapeError::ShapeMismatch {
                decoded,
                declared: self.output_shape,
            });
        }
        Ok(())
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<SpeculoAutoencoder<B>, ShapeError> {
        self.check_shapes()?;
        let encoded = self.encoded_shape()?;

        let mut encoder_convs = vec![];
        let mut channels = self.input_shape.channels;
        for filters in &self.encoder_filters {
            encoder_convs.push(
                Conv2dConfig::new([channels, *filters], [3, 3])
                    .with_padding(PaddingConfig2d::Same)
                    .init(device),
            );
            channels = *filters;
        }

        let mut decoder_convs = vec![];
        let mut decoder_norms = vec![];
        for filters in &self.decoder_filters {
            decoder_convs.push(
                ConvTranspose2dConfig::new([channels, *filters], [3, 3])
                    .with_stride([2, 2])
                    .with_padding([1, 1])
                    .with_padding_out([1, 1])
                    .init(device),
            );
            decoder_norms.push(BatchNormConfig::new(*filters).init(device));
            channels = *filters;
        }

        Ok(SpeculoAutoencoder {
            encoder_convs,
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            latent: LinearConfig::new(encoded.len(), self.latent_size).init(device),
            expand: LinearConfig::new(self.latent_size, encoded.len()).init(device),
            decoder_convs,
            decoder_norms,
            output_conv: ConvTranspose2dConfig::new([channels, self.output_shape.channels], [3, 3])
                .with_padding([1, 1])
                .init(device),
            dropout: DropoutConfig::new(self.dropout).init(),
            relu: Relu::new(),
            sigmoid: Sigmoid::new(),
            encoded_channels: encoded.channels,
            encoded_height: encoded.height,
            encoded_width: encoded.width,
        })
    }
}

/// Convolutional encoder, dense latent bottleneck, transposed-conv decoder.
#[derive(Module, Debug)]
pub struct SpeculoAutoencoder<B: Backend> {
    encoder_convs: Vec<Conv2d<B>>,
    pool: MaxPool2d,
    latent: Linear<B>,
    expand: Linear<B>,
    decoder_convs: Vec<ConvTranspose2d<B>>,
    decoder_norms: Vec<BatchNorm<B, 2>>,
    output_conv: ConvTranspose2d<B>,
    dropout: Dropout,
    relu: Relu,
    sigmoid: Sigmoid,
    encoded_channels: usize,
    encoded_height: usize,
    encoded_width: usize,
}

impl<B: Backend> SpeculoAutoencoder<B> {
    /// `[N, C_in, H_in, W_in]` -> `[N, latent_size]`
    pub fn encode(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let mut x = x;
        for (i, conv) in self.encoder_convs.iter().enumerate() {
            x = self.pool.forward(self.relu.forward(conv.forward(x)));
            if (i + 1) % 2 == 0 {
                x = self.dropout.forward(x);
            }
        }
        self.latent.forward(x.flatten::<2>(1, 3))
    }

    /// `[N, latent_size]` -> `[N, C_out, H_out, W_out]` with values in `(0, 1)`
    pub fn decode(&self, latent: Tensor<B, 2>) -> Tensor<B, 4> {
        let [batch, _] = latent.dims();
        let mut x = self.expand.forward(latent).reshape([
            batch,
            self.encoded_channels,
            self.encoded_height,
            self.encoded_width,
        ]);
        for (i, (conv, norm)) in self
            .decoder_convs
            .iter()
            .zip(self.decoder_norms.iter())
            .enumerate()
        {
            x = norm.forward(self.relu.forward(conv.forward(x)));
            if i % 2 == 0 {
                x = self.dropout.forward(x);
            }
        }
        self.sigmoid.forward(self.output_conv.forward(x))
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.decode(self.encode(x))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_shapes_line_up() {
        let config = SpeculoAutoencoderConfig::new();
        assert_eq!(config.encoded_shape(), Ok(ImageShape::new(2, 2, 64)));
        assert_eq!(config.decoded_shape(), Ok(ImageShape::new(32, 32, 1)));
        assert!(config.check_shapes().is_ok());
    }

    #[test]
    fn mismatched_output_is_rejected() {
        let config = SpeculoAutoencoderConfig::new().with_output_shape(ImageShape::new(64, 64, 1));
        assert_eq!(
            config.check_shapes(),
            Err(ShapeError::ShapeMismatch {
                decoded: ImageShape::new(32, 32, 1),
                declared: ImageShape::new(64, 64, 1),
            })
        );
    }

    #[test]
    fn too_many_pooling_stages_are_rejected() {
        let config = SpeculoAutoencoderConfig::new()
            .with_input_shape(ImageShape::new(8, 8, 1))
            .with_encoder_filters(vec![4, 4, 4, 4]);
        assert!(matches!(
            config.encoded_shape(),
            Err(ShapeError::EncoderTooDeep(_, 4))
        ));
    }
}
