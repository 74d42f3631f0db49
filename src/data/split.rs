use std::sync::Arc;

use burn::data::dataset::Dataset;
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

/// A view of a shared dataset through a list of indices.
pub struct Subset<I> {
    dataset: Arc<dyn Dataset<I>>,
    indices: Vec<usize>,
}

impl<I> Subset<I> {
    pub fn new(dataset: Arc<dyn Dataset<I>>, indices: Vec<usize>) -> Self {
        Self { dataset, indices }
    }

    pub fn range(dataset: Arc<dyn Dataset<I>>, start: usize, end: usize) -> Self {
        Self::new(dataset, (start..end).collect())
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }
}

impl<I: Send + Sync> Dataset<I> for Subset<I> {
    fn get(&self, index: usize) -> Option<I> {
        self.indices.get(index).and_then(|i| self.dataset.get(*i))
    }

    fn len(&self) -> usize {
        self.indices.len()
    }
}

/// Shuffles the indices with `seed` and cuts them at `floor(len * fraction)`.
pub fn random_split<I>(
    dataset: Arc<dyn Dataset<I>>,
    fraction: f64,
    seed: u64,
) -> (Subset<I>, Subset<I>) {
    let len = dataset.len();
    let first_len = (len as f64 * fraction) as usize;

    let mut indices: Vec<usize> = (0..len).collect();
    indices.shuffle(&mut StdRng::seed_from_u64(seed));
    let second = indices.split_off(first_len);

    (
        Subset::new(dataset.clone(), indices),
        Subset::new(dataset, second),
    )
}

/// Drops the trailing items that would form an incomplete batch.
///
/// burn's loader has no `drop_last`, so the cut happens here, before the
/// loader shuffles. The same `len % batch_size` items are left out of every
/// epoch rather than a fresh random tail. With several workers each worker
/// still ends on its own partial batch.
pub fn truncate_to_batches<I: Send + Sync + 'static>(
    dataset: impl Dataset<I> + 'static,
    batch_size: usize,
) -> Subset<I> {
    let len = dataset.len();
    let keep = if batch_size == 0 {
        len
    } else {
        len - len % batch_size
    };
    Subset::range(Arc::new(dataset), 0, keep)
}
