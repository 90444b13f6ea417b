//! Random test data

use ark_std::UniformRand;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use rayon::prelude::*;

/// Elements generated per seeded stream
const CHUNK: usize = 1 << 12;

/// Source of random elements for tests and benchmarks
pub trait GenerateRandom<T> {
    fn generate_random(size: usize) -> Vec<T>;
}

/// `size` uniformly random elements, reproducible from `seed`
///
/// Chunks are filled in parallel, each from its own ChaCha stream, so the
/// output depends only on `seed` and `size`.
pub fn random_elements<T: UniformRand + Send>(size: usize, seed: u64) -> Vec<T> {
    (0..size.div_ceil(CHUNK))
        .into_par_iter()
        .flat_map_iter(|chunk| {
            let mut rng = ChaCha20Rng::seed_from_u64(seed);
            rng.set_stream(chunk as u64);
            let len = CHUNK.min(size - chunk * CHUNK);
            (0..len).map(move |_| T::rand(&mut rng)).collect::<Vec<_>>()
        })
        .collect()
}
