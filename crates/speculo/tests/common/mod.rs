#![allow(dead_code)]

use std::{fs, path::Path};

use image::{GrayImage, Luma};
use speculo::{
    config::{SpeculoConfig, TrainDataConfig},
    face_database::face_image::ImageShape,
    speculo::autoencoder::SpeculoAutoencoderConfig,
};

pub const FRONT_A: u8 = 50;
pub const FRONT_B: u8 = 100;
pub const FRONT_C: u8 = 150;

pub fn write_gray(path: &Path, width: u32, height: u32, level: u8) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("failed to create fixture directory");
    }
    GrayImage::from_pixel(width, height, Luma([level]))
        .save(path)
        .expect("failed to write fixture image");
}

/// Split with identities `A` (two images), `B` and `C` (one image each) plus three frontals.
pub fn face_split(root: &Path) {
    write_gray(&root.join("Front/front_a.png"), 20, 20, FRONT_A);
    write_gray(&root.join("Front/front_b.png"), 20, 20, FRONT_B);
    write_gray(&root.join("Front/front_c.png"), 20, 20, FRONT_C);
    write_gray(&root.join("A/a_0.png"), 24, 20, 10);
    write_gray(&root.join("A/a_1.png"), 24, 20, 20);
    write_gray(&root.join("B/b_0.png"), 24, 20, 30);
    write_gray(&root.join("C/c_0.png"), 24, 20, 40);
}

/// Flat directory of `count` evaluation images.
pub fn evaluate_set(dir: &Path, count: usize) {
    for i in 0..count {
        write_gray(&dir.join(format!("eval_{i:02}.png")), 16, 16, (i * 20) as u8);
    }
}

pub fn tiny_model() -> SpeculoAutoencoderConfig {
    SpeculoAutoencoderConfig::new()
        .with_input_shape(ImageShape::new(16, 16, 1))
        .with_output_shape(ImageShape::new(8, 8, 1))
        .with_encoder_filters(vec![4, 4])
        .with_decoder_filters(vec![4])
        .with_latent_size(8)
        .with_dropout(0.0)
}

/// Workspace with `train/`, `test/` and `evaluate/` populated and a small config pointing at it.
pub fn tiny_workspace(root: &Path) -> SpeculoConfig {
    face_split(&root.join("train"));
    face_split(&root.join("test"));
    evaluate_set(&root.join("evaluate"), 12);

    SpeculoConfig::new()
        .with_model(speculo::config::ModelProvider::Config(tiny_model()))
        .with_train_data(TrainDataConfig::Directory {
            path: root.join("train"),
        })
        .with_validation_dir(root.join("test"))
        .with_evaluate_dir(root.join("evaluate"))
        .with_models_dir(root.join("models"))
        .with_stop_file(root.join(".stop_training"))
        .with_batch_size(2)
        .with_epochs(Some(2))
        .with_validation_steps(1)
        .with_preview_samples(2)
}

pub fn assert_uniform(pixels: &[f32], level: u8) {
    let expected = level as f32 / 255.0;
    for p in pixels {
        assert!(
            (p - expected).abs() < 0.01,
            "expected {expected}, found {p}"
        );
    }
}
