pub mod autoencoder;
pub mod inference;
pub mod progress;
pub mod training;
