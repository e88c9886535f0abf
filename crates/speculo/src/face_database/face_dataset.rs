use burn::data::dataset::Dataset;
use log::{debug, info};
use ron::de::SpannedError;
use serde::{Deserialize, Serialize};
use std::{
    ffi::OsStr,
    io,
    path::{Path, PathBuf},
};
use thiserror::Error;
use walkdir::WalkDir;

use super::face_image::{FaceImage, ImageError, ImageShape, read_image};

/// Name of the directory holding one frontal image per identity.
pub const FRONT_DIRECTORY: &str = "Front";

/// One non-frontal image path and the frontal image path it should be reconstructed into.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(from = "(PathBuf, PathBuf)", into = "(PathBuf, PathBuf)")]
pub struct PairPaths {
    pub input: PathBuf,
    pub target: PathBuf,
}

impl From<(PathBuf, PathBuf)> for PairPaths {
    fn from((input, target): (PathBuf, PathBuf)) -> Self {
        Self { input, target }
    }
}

impl From<PairPaths> for (PathBuf, PathBuf) {
    fn from(value: PairPaths) -> Self {
        (value.input, value.target)
    }
}

impl PairPaths {
    /// Decodes both sides: the input at `input_shape`, the target at `output_shape`.
    pub fn load(
        &self,
        input_shape: ImageShape,
        output_shape: ImageShape,
    ) -> Result<SamplePair, ImageError> {
        Ok(SamplePair {
            input: read_image(&self.input, input_shape)?,
            target: read_image(&self.target, output_shape)?,
        })
    }
}

/// Angled image of an identity together with that identity's frontal image.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplePair {
    pub input: FaceImage,
    pub target: FaceImage,
}

#[derive(Error, Debug)]
pub enum FaceDatasetError {
    #[error("The directory {} does not exist or is not a directory", .0.display())]
    MissingDirectory(PathBuf),
    #[error("The dataset index {} was not found", .0.display())]
    IndexNotFound(PathBuf),
    #[error("The index path {} is not valid because {}", .path.display(), .reason)]
    InvalidIndex { path: PathBuf, reason: String },
    #[error("No frontal image at position {} for identity {}", .position, .identity)]
    MissingFrontal { identity: String, position: usize },
    #[error("Unable to list directory due to {:?}", .0)]
    WalkError(#[from] walkdir::Error),
    #[error("Unable to load image due to {}", .0)]
    ImageError(#[from] ImageError),
    #[error("Unable to deserialize ron file due to {:?}", .0)]
    RonDeserializationError(#[from] SpannedError),
    #[error("Unable to access ron file due to {:?}", .0)]
    RonFileError(#[from] io::Error),
    #[error("Unable to serialize ron file due to {:?}", .0)]
    RonSerializationError(#[from] ron::error::Error),
}

fn check_dir(path: &Path) -> Result<(), FaceDatasetError> {
    if path.is_dir() {
        Ok(())
    } else {
        Err(FaceDatasetError::MissingDirectory(path.to_path_buf()))
    }
}

/// Direct children of `dir` sorted by file name, either only directories or only files.
pub(crate) fn sorted_children(
    dir: &Path,
    directories: bool,
) -> Result<Vec<PathBuf>, FaceDatasetError> {
    let mut children = vec![];
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry?;
        if entry.path().is_dir() == directories {
            children.push(entry.into_path());
        }
    }
    Ok(children)
}

/// Resolves every `(angled, frontal)` path pair of a split directory.
///
/// Identity directories are visited in sorted order with `Front` counted in that order. The
/// identity at sorted position `i` is paired with the frontal file at position `i - 1` of the
/// sorted `Front` listing, wrapping to the last frontal file for position 0. The frontal file is
/// chosen by position only, never by matching names.
pub fn pair_paths(root_directory: &Path) -> Result<Vec<PairPaths>, FaceDatasetError> {
    check_dir(root_directory)?;
    let front_dir = root_directory.join(FRONT_DIRECTORY);
    check_dir(&front_dir)?;

    let fronts = sorted_children(&front_dir, false)?;
    let mut pairs = vec![];
    for (position, identity_dir) in sorted_children(root_directory, true)?
        .into_iter()
        .enumerate()
    {
        if identity_dir.file_name().is_some_and(|n| n == OsStr::new(FRONT_DIRECTORY)) {
            continue;
        }
        let frontal = match position {
            0 => fronts.last(),
            p => fronts.get(p - 1),
        };
        let Some(frontal) = frontal else {
            return Err(FaceDatasetError::MissingFrontal {
                identity: identity_dir.display().to_string(),
                position,
            });
        };
        debug!("{:?} is paired with {:?}", identity_dir, frontal);
        for input in sorted_children(&identity_dir, false)? {
            pairs.push(PairPaths {
                input,
                target: frontal.clone(),
            });
        }
    }
    Ok(pairs)
}

/// Loads every pair of a split directory into memory, in directory order.
pub fn pair_eager(
    root_directory: &Path,
    input_shape: ImageShape,
    output_shape: ImageShape,
) -> Result<Vec<SamplePair>, FaceDatasetError> {
    let paths = pair_paths(root_directory)?;
    info!(
        "loading {} pairs from {}",
        paths.len(),
        root_directory.display()
    );
    let mut pairs = Vec::with_capacity(paths.len());
    for path in &paths {
        pairs.push(path.load(input_shape, output_shape)?);
    }
    Ok(pairs)
}

/// Fully materialized split, used for validation and small training sets.
#[derive(Debug, Clone)]
pub struct EagerFaceDataset {
    name: String,
    pairs: Vec<SamplePair>,
}

impl EagerFaceDataset {
    pub fn new(name: impl Into<String>, pairs: Vec<SamplePair>) -> Self {
        Self {
            name: name.into(),
            pairs,
        }
    }

    /// Loads a split directory and shuffles the pairs once with `seed`.
    pub fn load(
        root_directory: &Path,
        input_shape: ImageShape,
        output_shape: ImageShape,
        seed: u64,
    ) -> Result<Self, FaceDatasetError> {
        let mut pairs = pair_eager(root_directory, input_shape, output_shape)?;
        super::face_batcher::shuffle_pairs(&mut pairs, seed);
        let name = root_directory
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unnamed".into());
        Ok(Self::new(name, pairs))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pairs(&self) -> &[SamplePair] {
        &self.pairs
    }
}

impl Dataset<SamplePair> for EagerFaceDataset {
    fn len(&self) -> usize {
        self.pairs.len()
    }

    fn get(&self, index: usize) -> Option<SamplePair> {
        self.pairs.get(index).cloned()
    }
}
