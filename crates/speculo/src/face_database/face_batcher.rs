use burn::{data::dataloader::batcher::Batcher, prelude::Backend, tensor::Tensor};
use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};

use super::{
    face_dataset::SamplePair,
    face_image::{FaceImage, PixelImage, denormalize},
};

#[derive(Clone, Debug)]
pub struct FaceBatch<B: Backend> {
    /// angled faces
    /// dim [N, C_in, H_in, W_in]
    pub inputs: Tensor<B, 4>,
    /// frontal faces
    /// dim [N, C_out, H_out, W_out]
    pub targets: Tensor<B, 4>,
}

#[derive(Clone, Debug)]
pub struct FaceBatcher<B: Backend> {
    device: B::Device,
}

impl<B: Backend> FaceBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }
}

impl<B: Backend> Batcher<SamplePair, FaceBatch<B>> for FaceBatcher<B> {
    fn batch(&self, items: Vec<SamplePair>) -> FaceBatch<B> {
        FaceBatch {
            inputs: stack_images(items.iter().map(|pair| &pair.input), &self.device),
            targets: stack_images(items.iter().map(|pair| &pair.target), &self.device),
        }
    }
}

/// Stacks `[H, W, C]` images into one `[N, C, H, W]` tensor. Panics on an empty iterator.
pub fn stack_images<'a, B: Backend>(
    images: impl Iterator<Item = &'a FaceImage>,
    device: &B::Device,
) -> Tensor<B, 4> {
    let tensors: Vec<Tensor<B, 4>> = images
        .map(|image| Tensor::<B, 4>::from_data(image.to_tensor_data(), device))
        .collect();
    Tensor::cat(tensors, 0).permute([0, 3, 1, 2])
}

/// Groups consecutive items into chunks of `batch_size`; a trailing partial chunk is kept.
pub struct Batches<I: Iterator> {
    items: I,
    batch_size: usize,
}

pub fn to_batches<I: IntoIterator>(items: I, batch_size: usize) -> Batches<I::IntoIter> {
    assert!(batch_size > 0, "The batch size must be at least 1");
    Batches {
        items: items.into_iter(),
        batch_size,
    }
}

impl<I: Iterator> Iterator for Batches<I> {
    type Item = Vec<I::Item>;

    fn next(&mut self) -> Option<Self::Item> {
        let batch: Vec<_> = self.items.by_ref().take(self.batch_size).collect();
        if batch.is_empty() { None } else { Some(batch) }
    }
}

/// Full, seeded shuffle of the pair order.
pub fn shuffle_pairs<T>(pairs: &mut [T], seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    pairs.shuffle(&mut rng);
}

/// Pair converted back to raw pixels for previews.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewSample {
    pub input: PixelImage,
    pub target: PixelImage,
}

/// Takes at most `k` pairs from `pairs` and denormalizes them. Only those `k` pairs are pulled
/// from the source.
pub fn sample_preview<I>(pairs: I, k: usize) -> Vec<PreviewSample>
where
    I: IntoIterator<Item = SamplePair>,
{
    pairs
        .into_iter()
        .take(k)
        .map(|pair| PreviewSample {
            input: denormalize(&pair.input),
            target: denormalize(&pair.target),
        })
        .collect()
}
