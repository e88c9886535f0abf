mod common;

#[cfg(test)]
mod inference {
    use std::{fs, path::Path};

    use burn::{backend::NdArray, module::Module, record::CompactRecorder};
    use speculo::{
        face_database::face_image::{FaceImage, ImageShape, denormalize},
        speculo::{
            autoencoder::SpeculoAutoencoder,
            inference::{Inference, InferenceError, Prediction},
        },
    };
    use tempfile::TempDir;

    use crate::common::{evaluate_set, tiny_model};

    type MyBackend = NdArray<f32>;

    fn saved_model(dir: &Path) -> std::path::PathBuf {
        let device = Default::default();
        let model: SpeculoAutoencoder<MyBackend> =
            tiny_model().init(&device).expect("failed to init model");
        let path = dir.join("Model-v1");
        model
            .save_file(&path, &CompactRecorder::new())
            .expect("failed to save model");
        path
    }

    fn gray_input(level: f32) -> FaceImage {
        FaceImage::new(vec![level; 16 * 16], ImageShape::new(16, 16, 1)).expect("bad input")
    }

    #[test]
    fn model_is_loaded_on_first_use() {
        let dir = TempDir::new().expect("failed to create temp dir");
        let model_path = saved_model(dir.path());
        let mut inference =
            Inference::<MyBackend>::new(tiny_model(), model_path, dir.path(), Default::default());
        assert!(!inference.is_loaded());

        inference.predict(&gray_input(0.5), true).expect("failed to predict");
        assert!(inference.is_loaded());
    }

    #[test]
    fn preview_is_denormalized_raw_output() {
        let dir = TempDir::new().expect("failed to create temp dir");
        let model_path = saved_model(dir.path());
        let mut inference =
            Inference::<MyBackend>::new(tiny_model(), model_path, dir.path(), Default::default());
        let input = gray_input(0.25);

        let Prediction::Raw(raw) = inference.predict(&input, false).expect("failed to predict")
        else {
            panic!("expected the raw contract");
        };
        assert_eq!(raw.len(), 8 * 8);
        assert!(raw.iter().all(|v| (0.0..=1.0).contains(v)));

        let Prediction::Preview(preview) =
            inference.predict(&input, true).expect("failed to predict")
        else {
            panic!("expected the preview contract");
        };
        assert_eq!(preview.shape(), ImageShape::new(8, 8, 1));
        let expected = denormalize(
            &FaceImage::new(raw, ImageShape::new(8, 8, 1)).expect("bad raw output"),
        );
        assert_eq!(preview, expected);
    }

    #[test]
    fn latent_has_configured_size() {
        let dir = TempDir::new().expect("failed to create temp dir");
        let model_path = saved_model(dir.path());
        let mut inference =
            Inference::<MyBackend>::new(tiny_model(), model_path, dir.path(), Default::default());

        let latent = inference.latent(&gray_input(0.1)).expect("failed to encode");
        assert_eq!(latent.len(), 8);
    }

    #[test]
    fn evaluate_writes_alternating_rows() {
        let dir = TempDir::new().expect("failed to create temp dir");
        let model_path = saved_model(dir.path());
        let evaluate_dir = dir.path().join("evaluate");
        evaluate_set(&evaluate_dir, 12);
        let destination = dir.path().join("predictions.png");

        let mut inference =
            Inference::<MyBackend>::new(tiny_model(), model_path, &evaluate_dir, Default::default());
        let grid = inference
            .evaluate("Model Predictions", Some(destination.as_path()))
            .expect("failed to evaluate");

        let rows: Vec<(&str, usize)> = grid
            .rows()
            .iter()
            .map(|(label, images)| (label.as_str(), images.len()))
            .collect();
        assert_eq!(
            rows,
            vec![("input", 10), ("output", 10), ("input", 2), ("output", 2)]
        );
        assert_eq!(grid.rows()[1].1[0].shape(), ImageShape::new(8, 8, 1));
        assert!(destination.is_file());
    }

    #[test]
    fn empty_evaluate_set_is_an_error() {
        let dir = TempDir::new().expect("failed to create temp dir");
        let model_path = saved_model(dir.path());
        let evaluate_dir = dir.path().join("evaluate");
        fs::create_dir_all(&evaluate_dir).expect("failed to create directory");

        let mut inference =
            Inference::<MyBackend>::new(tiny_model(), model_path, &evaluate_dir, Default::default());
        let r = inference.evaluate("Model Predictions", None);
        assert!(matches!(r, Err(InferenceError::EmptyEvaluateSet(_))));
    }

    #[test]
    fn missing_weights_are_reported() {
        let dir = TempDir::new().expect("failed to create temp dir");
        let mut inference = Inference::<MyBackend>::new(
            tiny_model(),
            dir.path().join("Model-v9"),
            dir.path(),
            Default::default(),
        );
        let r = inference.predict(&gray_input(0.5), true);
        assert!(matches!(
            r,
            Err(InferenceError::ModelWeightsDeserializationError(_))
        ));
        assert!(!inference.is_loaded());
    }

    #[test]
    fn resident_model_survives_deleted_weights() {
        let dir = TempDir::new().expect("failed to create temp dir");
        let model_path = saved_model(dir.path());
        let evaluate_dir = dir.path().join("evaluate");
        evaluate_set(&evaluate_dir, 3);
        let mut inference = Inference::<MyBackend>::new(
            tiny_model(),
            model_path.clone(),
            &evaluate_dir,
            Default::default(),
        );

        let first = inference.predict(&gray_input(0.5), false).expect("failed to predict");
        fs::remove_file(model_path.with_extension("mpk")).expect("failed to remove weights");

        let second = inference.predict(&gray_input(0.5), false).expect("model was reloaded");
        assert_eq!(first, second);
        inference
            .evaluate("Model Predictions", None)
            .expect("model was reloaded");
        inference.latent(&gray_input(0.5)).expect("model was reloaded");
    }

    #[test]
    fn wrong_input_shape_is_an_error() {
        let dir = TempDir::new().expect("failed to create temp dir");
        let model_path = saved_model(dir.path());
        let mut inference =
            Inference::<MyBackend>::new(tiny_model(), model_path, dir.path(), Default::default());
        let small =
            FaceImage::new(vec![0.5; 8 * 8], ImageShape::new(8, 8, 1)).expect("bad input");

        let r = inference.predict(&small, true);
        assert!(matches!(
            r,
            Err(InferenceError::InputShapeMismatch { expected, actual })
                if expected == ImageShape::new(16, 16, 1) && actual == ImageShape::new(8, 8, 1)
        ));
        assert!(matches!(
            inference.latent(&small),
            Err(InferenceError::InputShapeMismatch { .. })
        ));
        assert!(matches!(
            inference.predict(&small, false),
            Err(InferenceError::InputShapeMismatch { .. })
        ));
        assert!(!inference.is_loaded());
    }
}
