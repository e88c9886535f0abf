pub mod face_batcher;
pub mod face_dataset;
pub mod face_image;
pub mod face_index;
