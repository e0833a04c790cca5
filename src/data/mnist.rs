/// MNIST dataset wrapper and batch iterator
use candle_core::{DType, Device, Result, Tensor};
use std::path::Path;

/// The four IDX files candle-datasets expects in a local MNIST directory.
const IDX_FILES: [&str; 4] = [
    "train-images-idx3-ubyte",
    "train-labels-idx1-ubyte",
    "t10k-images-idx3-ubyte",
    "t10k-labels-idx1-ubyte",
];

/// MNIST train and test splits, immutable once loaded.
///
/// Images are `f32` in `[0, 1]` with shape `[N, 784]`; labels are `u32`
/// with shape `[N]`.
pub struct Mnist {
    train_images: Tensor,
    train_labels: Tensor,
    test_images: Tensor,
    test_labels: Tensor,
}

impl Mnist {
    /// Load MNIST from a directory of IDX files, downloading from the
    /// hub when the files are not present.
    pub fn load<P: AsRef<Path>>(dir: P) -> crate::Result<Self> {
        let dir = dir.as_ref();

        let raw = if IDX_FILES.iter().all(|f| dir.join(f).is_file()) {
            log::info!("Loading MNIST from: {:?}", dir);
            candle_datasets::vision::mnist::load_dir(dir)?
        } else {
            log::info!("IDX files not found in {:?}, downloading MNIST from the hub", dir);
            candle_datasets::vision::mnist::load()?
        };

        let dataset = Self {
            train_images: raw.train_images,
            train_labels: raw.train_labels.to_dtype(DType::U32)?,
            test_images: raw.test_images,
            test_labels: raw.test_labels.to_dtype(DType::U32)?,
        };

        log::info!(
            "MNIST loaded: {} train examples, {} test examples",
            dataset.train_len()?,
            dataset.test_len()?
        );

        Ok(dataset)
    }

    /// Number of training examples
    pub fn train_len(&self) -> Result<usize> {
        self.train_images.dim(0)
    }

    /// Number of test examples
    pub fn test_len(&self) -> Result<usize> {
        self.test_images.dim(0)
    }

    /// Batch iterator over the training split
    pub fn train_batches(&self, batch_size: usize, shuffle: bool) -> crate::Result<Batches> {
        Batches::new(
            self.train_images.clone(),
            self.train_labels.clone(),
            batch_size,
            shuffle,
        )
    }

    /// Batch iterator over the test split, never shuffled
    pub fn test_batches(&self, batch_size: usize) -> crate::Result<Batches> {
        Batches::new(
            self.test_images.clone(),
            self.test_labels.clone(),
            batch_size,
            false,
        )
    }
}

/// Batch iterator over paired image and label tensors.
///
/// Yields `[batch_size, 784]` images and `[batch_size]` labels; the
/// final batch may be short. With `shuffle`, the visit order is
/// re-permuted on every [`Batches::reset`].
pub struct Batches {
    images: Tensor,
    labels: Tensor,
    batch_size: usize,
    indices: Vec<u32>,
    position: usize,
    shuffle: bool,
}

impl Batches {
    /// Create a new batch iterator
    pub fn new(
        images: Tensor,
        labels: Tensor,
        batch_size: usize,
        shuffle: bool,
    ) -> crate::Result<Self> {
        if batch_size == 0 {
            return Err(crate::SwarmError::Data(
                "batch size must be > 0".to_string(),
            ));
        }
        let num_examples = images.dim(0)?;
        if num_examples != labels.dim(0)? {
            return Err(crate::SwarmError::Data(format!(
                "image/label count mismatch: {} images, {} labels",
                num_examples,
                labels.dim(0)?
            )));
        }

        let mut indices: Vec<u32> = (0..num_examples as u32).collect();
        if shuffle {
            use rand::seq::SliceRandom;
            let mut rng = rand::thread_rng();
            indices.shuffle(&mut rng);
        }

        Ok(Self {
            images,
            labels,
            batch_size,
            indices,
            position: 0,
            shuffle,
        })
    }

    /// Get next batch of (image, label) tensors
    pub fn next_batch(&mut self, device: &Device) -> Result<Option<(Tensor, Tensor)>> {
        if self.position >= self.indices.len() {
            return Ok(None);
        }

        let end = (self.position + self.batch_size).min(self.indices.len());
        let batch_indices = self.indices[self.position..end].to_vec();
        let batch_len = batch_indices.len();
        self.position = end;

        // Indices live on the same device as the source tensors; the
        // selected batch then moves to the requested device.
        let index = Tensor::from_vec(batch_indices, batch_len, self.images.device())?;
        let images = self.images.index_select(&index, 0)?.to_device(device)?;
        let labels = self.labels.index_select(&index, 0)?.to_device(device)?;

        Ok(Some((images, labels)))
    }

    /// Reset loader for new epoch
    pub fn reset(&mut self) {
        self.position = 0;

        if self.shuffle {
            use rand::seq::SliceRandom;
            let mut rng = rand::thread_rng();
            self.indices.shuffle(&mut rng);
        }
    }

    /// Get number of batches
    pub fn num_batches(&self) -> usize {
        (self.indices.len() + self.batch_size - 1) / self.batch_size
    }

    /// Get number of examples
    pub fn num_examples(&self) -> usize {
        self.indices.len()
    }
}

impl super::BatchLoader for Batches {
    fn next_batch(&mut self, device: &Device) -> Result<Option<(Tensor, Tensor)>> {
        Batches::next_batch(self, device)
    }

    fn reset(&mut self) {
        Batches::reset(self)
    }

    fn num_batches(&self) -> usize {
        Batches::num_batches(self)
    }

    fn num_examples(&self) -> usize {
        Batches::num_examples(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::BatchLoader;

    /// Ten 784-wide rows where every pixel of row `i` equals `i`, so a
    /// row can always be matched back to its label after shuffling.
    fn tagged_dataset(n: usize) -> (Tensor, Tensor) {
        let device = Device::Cpu;
        let mut pixels = Vec::with_capacity(n * 784);
        for i in 0..n {
            pixels.extend(std::iter::repeat(i as f32).take(784));
        }
        let labels: Vec<u32> = (0..n as u32).collect();
        let images = Tensor::from_vec(pixels, (n, 784), &device).unwrap();
        let labels = Tensor::from_vec(labels, n, &device).unwrap();
        (images, labels)
    }

    #[test]
    fn test_batch_shapes_and_short_final_batch() -> crate::Result<()> {
        let (images, labels) = tagged_dataset(10);
        let mut batches = Batches::new(images, labels, 4, false)?;
        let device = Device::Cpu;

        assert_eq!(batches.num_batches(), 3);
        assert_eq!(batches.num_examples(), 10);

        let (x, y) = batches.next_batch(&device)?.unwrap();
        assert_eq!(x.dims(), &[4, 784]);
        assert_eq!(y.dims(), &[4]);

        let (x, _) = batches.next_batch(&device)?.unwrap();
        assert_eq!(x.dims(), &[4, 784]);

        let (x, y) = batches.next_batch(&device)?.unwrap();
        assert_eq!(x.dims(), &[2, 784]);
        assert_eq!(y.dims(), &[2]);

        assert!(batches.next_batch(&device)?.is_none());
        Ok(())
    }

    #[test]
    fn test_single_batch_when_batch_size_exceeds_len() -> crate::Result<()> {
        let (images, labels) = tagged_dataset(3);
        let mut batches = Batches::new(images, labels, 100, false)?;

        let (x, _) = batches.next_batch(&Device::Cpu)?.unwrap();
        assert_eq!(x.dims(), &[3, 784]);
        assert!(batches.next_batch(&Device::Cpu)?.is_none());
        assert_eq!(batches.num_batches(), 1);
        Ok(())
    }

    #[test]
    fn test_empty_dataset_yields_no_batches() -> crate::Result<()> {
        let device = Device::Cpu;
        let images = Tensor::zeros((0, 784), DType::F32, &device).unwrap();
        let labels = Tensor::zeros(0, DType::U32, &device).unwrap();
        let mut batches = Batches::new(images, labels, 4, false)?;

        assert_eq!(batches.num_batches(), 0);
        assert!(batches.next_batch(&device)?.is_none());
        Ok(())
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let (images, labels) = tagged_dataset(4);
        assert!(Batches::new(images, labels, 0, false).is_err());
    }

    #[test]
    fn test_mismatched_lengths_rejected() {
        let (images, _) = tagged_dataset(4);
        let labels = Tensor::zeros(3, DType::U32, &Device::Cpu).unwrap();
        assert!(Batches::new(images, labels, 2, false).is_err());
    }

    #[test]
    fn test_shuffle_keeps_images_paired_with_labels() -> crate::Result<()> {
        let (images, labels) = tagged_dataset(10);
        let mut batches = Batches::new(images, labels, 3, true)?;
        let device = Device::Cpu;

        let mut seen = Vec::new();
        while let Some((x, y)) = batches.next_batch(&device)? {
            let rows = x.to_vec2::<f32>()?;
            let tags = y.to_vec1::<u32>()?;
            for (row, tag) in rows.iter().zip(tags.iter()) {
                assert_eq!(row[0] as u32, *tag);
                assert_eq!(row[783] as u32, *tag);
                seen.push(*tag);
            }
        }

        seen.sort_unstable();
        assert_eq!(seen, (0..10).collect::<Vec<u32>>());
        Ok(())
    }

    #[test]
    fn test_reset_revisits_every_example() -> crate::Result<()> {
        let (images, labels) = tagged_dataset(5);
        let mut batches = Batches::new(images, labels, 2, true)?;
        let device = Device::Cpu;

        for _ in 0..2 {
            batches.reset();
            let mut count = 0;
            while let Some((x, _)) = batches.next_batch(&device)? {
                count += x.dim(0)?;
            }
            assert_eq!(count, 5);
        }
        Ok(())
    }

    #[test]
    fn test_usable_as_trait_object() -> crate::Result<()> {
        let (images, labels) = tagged_dataset(6);
        let mut boxed: Box<dyn BatchLoader> = Box::new(Batches::new(images, labels, 2, false)?);

        assert_eq!(boxed.num_batches(), 3);
        assert_eq!(boxed.num_examples(), 6);
        let (x, _) = boxed.next_batch(&Device::Cpu)?.unwrap();
        assert_eq!(x.dims(), &[2, 784]);
        Ok(())
    }
}
