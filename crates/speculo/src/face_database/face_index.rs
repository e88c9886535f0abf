use log::{info, warn};
use ron::{de::from_reader, ser::to_writer};
use serde::{Deserialize, Serialize};
use std::{
    fs::{self, File},
    io::BufReader,
    path::{Path, PathBuf},
};

use super::{
    face_dataset::{FaceDatasetError, PairPaths, SamplePair, pair_paths},
    face_image::ImageShape,
};

/// Persisted, ordered list of `(input_path, target_path)` tuples.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(transparent)]
pub struct FaceIndex {
    pairs: Vec<PairPaths>,
}

impl FaceIndex {
    pub fn new(pairs: Vec<PairPaths>) -> Self {
        Self { pairs }
    }

    /// Builds the index of a split directory with the same pairing rule as the eager path.
    pub fn from_directory(root_directory: &Path) -> Result<Self, FaceDatasetError> {
        Ok(Self::new(pair_paths(root_directory)?))
    }

    pub fn pairs(&self) -> &[PairPaths] {
        &self.pairs
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Writes the index once. An existing index is never replaced.
    pub fn save_to_ron(&self, path: &Path) -> Result<(), FaceDatasetError> {
        if path.is_dir() {
            return Err(FaceDatasetError::InvalidIndex {
                path: path.to_path_buf(),
                reason: "Invalid Path. Please enter a .ron path".into(),
            });
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = File::create_new(path)?;
        to_writer(file, self)?;
        info!("wrote {} pairs to {}", self.len(), path.display());
        Ok(())
    }

    pub fn load_from_ron(path: &Path) -> Result<Self, FaceDatasetError> {
        if !path.exists() {
            return Err(FaceDatasetError::IndexNotFound(path.to_path_buf()));
        }
        if path.is_dir() {
            return Err(FaceDatasetError::InvalidIndex {
                path: path.to_path_buf(),
                reason: "The path does not lead to a valid .ron file".into(),
            });
        }
        let file = File::open(path)?;
        Ok(from_reader(BufReader::new(file))?)
    }
}


/// Pairs decoded on demand from a [`FaceIndex`]; nothing but the path list stays in memory.
#[derive(Debug, Clone)]
pub struct LazyFaceDataset {
    index_file: PathBuf,
    index: FaceIndex,
    input_shape: ImageShape,
    output_shape: ImageShape,
}

/// Opens the index at `index_file` for streaming. A missing index is a hard error.
pub fn pair_lazy(
    index_file: &Path,
    input_shape: ImageShape,
    output_shape: ImageShape,
) -> Result<LazyFaceDataset, FaceDatasetError> {
    let index = FaceIndex::load_from_ron(index_file)?;
    info!(
        "streaming {} pairs from {}",
        index.len(),
        index_file.display()
    );
    Ok(LazyFaceDataset {
        index_file: index_file.to_path_buf(),
        index,
        input_shape,
        output_shape,
    })
}

impl LazyFaceDataset {
    pub fn index_file(&self) -> &Path {
        &self.index_file
    }

    /// One pass over the index in order. Pairs that fail to decode are logged and skipped.
    pub fn iter(&self) -> LazyPairs<'_> {
        LazyPairs {
            dataset: self,
            position: 0,
        }
    }

    /// Endless stream that restarts from the first pair after every pass. Ends only when a
    /// whole pass produced no decodable pair.
    pub fn stream(&self) -> PairStream<'_> {
        PairStream {
            pass: self.iter(),
            yielded_in_pass: false,
        }
    }

    /// Total pair count as recorded in the index, known before anything is decoded.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    fn decode(&self, paths: &PairPaths) -> Option<SamplePair> {
        match paths.load(self.input_shape, self.output_shape) {
            Ok(pair) => Some(pair),
            Err(e) => {
                warn!("skipping {:?} -> {:?}: {e}", paths.input, paths.target);
                None
            }
        }
    }
}

pub struct LazyPairs<'a> {
    dataset: &'a LazyFaceDataset,
    position: usize,
}

impl Iterator for LazyPairs<'_> {
    type Item = SamplePair;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(paths) = self.dataset.index.pairs.get(self.position) {
            self.position += 1;
            if let Some(pair) = self.dataset.decode(paths) {
                return Some(pair);
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.dataset.index.len() - self.position))
    }
}

pub struct PairStream<'a> {
    pass: LazyPairs<'a>,
    yielded_in_pass: bool,
}

impl Iterator for PairStream<'_> {
    type Item = SamplePair;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(pair) = self.pass.next() {
            self.yielded_in_pass = true;
            return Some(pair);
        }
        if !self.yielded_in_pass {
            return None;
        }
        self.pass = self.pass.dataset.iter();
        self.yielded_in_pass = false;
        self.next()
    }
}
