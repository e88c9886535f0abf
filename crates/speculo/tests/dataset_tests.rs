mod common;

#[cfg(test)]
mod dataset {
    use std::{fs, path::Path};

    use burn::data::dataset::Dataset;
    use speculo::face_database::{
        face_dataset::{EagerFaceDataset, FaceDatasetError, pair_eager, pair_paths},
        face_image::ImageShape,
        face_index::{FaceIndex, pair_lazy},
    };
    use tempfile::TempDir;

    use crate::common::{FRONT_A, FRONT_B, FRONT_C, assert_uniform, face_split, write_gray};

    const INPUT: ImageShape = ImageShape::new(16, 16, 1);
    const OUTPUT: ImageShape = ImageShape::new(8, 8, 1);

    fn file_name(path: &Path) -> String {
        path.file_name()
            .expect("no file name")
            .to_string_lossy()
            .into_owned()
    }

    #[test]
    fn identities_pair_with_previous_frontal() {
        let dir = TempDir::new().expect("failed to create temp dir");
        face_split(dir.path());

        let pairs = pair_paths(dir.path()).expect("failed to pair split");
        let names: Vec<(String, String)> = pairs
            .iter()
            .map(|p| (file_name(&p.input), file_name(&p.target)))
            .collect();
        assert_eq!(
            names,
            vec![
                ("a_0.png".to_string(), "front_c.png".to_string()),
                ("a_1.png".to_string(), "front_c.png".to_string()),
                ("b_0.png".to_string(), "front_a.png".to_string()),
                ("c_0.png".to_string(), "front_b.png".to_string()),
            ]
        );
    }

    #[test]
    fn eager_pairs_carry_frontal_pixels() {
        let dir = TempDir::new().expect("failed to create temp dir");
        face_split(dir.path());

        let pairs = pair_eager(dir.path(), INPUT, OUTPUT).expect("failed to load split");
        assert_eq!(pairs.len(), 4);
        for pair in &pairs {
            assert_eq!(pair.input.shape(), INPUT);
            assert_eq!(pair.target.shape(), OUTPUT);
        }
        assert_uniform(pairs[0].target.pixels(), FRONT_C);
        assert_uniform(pairs[2].target.pixels(), FRONT_A);
        assert_uniform(pairs[3].target.pixels(), FRONT_B);
        assert_uniform(pairs[2].input.pixels(), 30);
    }

    #[test]
    fn eager_dataset_shuffles_reproducibly() {
        let dir = TempDir::new().expect("failed to create temp dir");
        face_split(dir.path());

        let a = EagerFaceDataset::load(dir.path(), INPUT, OUTPUT, 3).expect("failed to load");
        let b = EagerFaceDataset::load(dir.path(), INPUT, OUTPUT, 3).expect("failed to load");
        assert_eq!(a.pairs(), b.pairs());
        assert_eq!(a.len(), 4);
        assert!(a.get(4).is_none());
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_identity_is_paired() {
        let dir = TempDir::new().expect("failed to create temp dir");
        let split = dir.path().join("train");
        face_split(&split);
        let elsewhere = dir.path().join("elsewhere");
        fs::create_dir_all(&elsewhere).expect("failed to create directory");
        fs::rename(split.join("B"), elsewhere.join("B")).expect("failed to move identity");
        std::os::unix::fs::symlink(elsewhere.join("B"), split.join("B"))
            .expect("failed to link identity");

        let pairs = pair_paths(&split).expect("failed to pair split");
        assert_eq!(pairs.len(), 4);
        assert_eq!(file_name(&pairs[2].input), "b_0.png");
        assert_eq!(file_name(&pairs[2].target), "front_a.png");
    }

    #[test]
    fn missing_front_directory() {
        let dir = TempDir::new().expect("failed to create temp dir");
        write_gray(&dir.path().join("A/a_0.png"), 8, 8, 10);

        let r = pair_paths(dir.path());
        assert!(matches!(r, Err(FaceDatasetError::MissingDirectory(p)) if p.ends_with("Front")));
    }

    #[test]
    fn missing_root_directory() {
        let dir = TempDir::new().expect("failed to create temp dir");
        let r = pair_paths(&dir.path().join("nope"));
        assert!(matches!(r, Err(FaceDatasetError::MissingDirectory(_))));
    }

    #[test]
    fn too_few_frontals() {
        let dir = TempDir::new().expect("failed to create temp dir");
        face_split(dir.path());
        fs::remove_file(dir.path().join("Front/front_b.png")).expect("failed to remove");
        fs::remove_file(dir.path().join("Front/front_c.png")).expect("failed to remove");

        let r = pair_paths(dir.path());
        assert!(matches!(
            r,
            Err(FaceDatasetError::MissingFrontal { position: 2, .. })
        ));
    }

    #[test]
    fn index_round_trip_keeps_pairs() {
        let dir = TempDir::new().expect("failed to create temp dir");
        let split = dir.path().join("train");
        face_split(&split);
        let index_file = dir.path().join("index/face_index.ron");

        let index = FaceIndex::from_directory(&split).expect("failed to index");
        index.save_to_ron(&index_file).expect("failed to save index");
        let loaded = FaceIndex::load_from_ron(&index_file).expect("failed to load index");
        assert_eq!(index, loaded);
        assert_eq!(loaded.len(), 4);
    }

    #[test]
    fn index_is_never_overwritten() {
        let dir = TempDir::new().expect("failed to create temp dir");
        face_split(dir.path());
        let index_file = dir.path().join("face_index.ron");

        let index = FaceIndex::from_directory(dir.path()).expect("failed to index");
        index.save_to_ron(&index_file).expect("failed to save index");
        assert!(index.save_to_ron(&index_file).is_err());
    }

    #[test]
    fn missing_index_is_reported() {
        let dir = TempDir::new().expect("failed to create temp dir");
        let r = pair_lazy(&dir.path().join("missing.ron"), INPUT, OUTPUT);
        assert!(matches!(r, Err(FaceDatasetError::IndexNotFound(_))));
    }

    #[test]
    fn lazy_stream_restarts_and_matches_eager() {
        let dir = TempDir::new().expect("failed to create temp dir");
        let split = dir.path().join("train");
        face_split(&split);
        let index_file = dir.path().join("face_index.ron");
        FaceIndex::from_directory(&split)
            .expect("failed to index")
            .save_to_ron(&index_file)
            .expect("failed to save index");

        let lazy = pair_lazy(&index_file, INPUT, OUTPUT).expect("failed to open index");
        assert_eq!(lazy.len(), 4);
        assert_eq!(lazy.iter().count(), 4);
        assert_eq!(lazy.iter().count(), 4);

        let eager = pair_eager(&split, INPUT, OUTPUT).expect("failed to load split");
        let streamed: Vec<_> = lazy.stream().take(12).collect();
        assert_eq!(streamed.len(), 12);
        for (i, pair) in streamed.iter().enumerate() {
            assert_eq!(pair, &eager[i % 4]);
        }
    }

    #[test]
    fn lazy_skips_undecodable_pairs() {
        let dir = TempDir::new().expect("failed to create temp dir");
        let split = dir.path().join("train");
        face_split(&split);
        let index_file = dir.path().join("face_index.ron");
        FaceIndex::from_directory(&split)
            .expect("failed to index")
            .save_to_ron(&index_file)
            .expect("failed to save index");
        fs::write(split.join("B/b_0.png"), b"not a png").expect("failed to corrupt image");

        let lazy = pair_lazy(&index_file, INPUT, OUTPUT).expect("failed to open index");
        assert_eq!(lazy.len(), 4);
        assert_eq!(lazy.iter().count(), 3);
        assert_eq!(lazy.stream().take(6).count(), 6);
    }

    #[test]
    fn lazy_stream_ends_when_nothing_decodes() {
        let dir = TempDir::new().expect("failed to create temp dir");
        let split = dir.path().join("train");
        face_split(&split);
        let index_file = dir.path().join("face_index.ron");
        FaceIndex::from_directory(&split)
            .expect("failed to index")
            .save_to_ron(&index_file)
            .expect("failed to save index");
        for front in ["front_a.png", "front_b.png", "front_c.png"] {
            fs::write(split.join("Front").join(front), b"broken").expect("failed to corrupt");
        }

        let lazy = pair_lazy(&index_file, INPUT, OUTPUT).expect("failed to open index");
        assert_eq!(lazy.stream().count(), 0);
    }
}
