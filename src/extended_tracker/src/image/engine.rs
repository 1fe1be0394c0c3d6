//! Image engine contract and its CPU implementation.

use rayon::prelude::*;

use super::{HoleSample, ImageMap};

/// Low-level image operations the tracker delegates per frame.
pub trait ImageEngine: Send + Sync {
    /// 2× box-downsample of a scalar map; holes are excluded from each 2×2
    /// average and a block with no valid sample becomes a hole.
    fn filter_subsample_with_holes(&self, output: &mut ImageMap<f32>, input: &ImageMap<f32>);

    /// Same as [`ImageEngine::filter_subsample_with_holes`] for
    /// four-component maps (normals).
    fn filter_subsample_vectors_with_holes(
        &self,
        output: &mut ImageMap<[f32; 4]>,
        input: &ImageMap<[f32; 4]>,
    );

    /// Number of valid (non-hole) depth samples.
    fn count_valid_depths(&self, depth: &ImageMap<f32>) -> usize;
}

/// Multi-threaded CPU image engine.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuImageEngine;

impl CpuImageEngine {
    pub fn new() -> Self {
        Self
    }
}

fn subsample_with_holes<T: HoleSample>(output: &mut ImageMap<T>, input: &ImageMap<T>) {
    let out_size = input.size().halved();
    output.reset(out_size, T::HOLE);
    if out_size.is_empty() {
        return;
    }

    let in_width = input.width();
    let in_data = input.data();

    output
        .data_mut()
        .par_chunks_mut(out_size.width)
        .enumerate()
        .for_each(|(y, row)| {
            let mut block = [T::HOLE; 4];
            for (x, out) in row.iter_mut().enumerate() {
                let mut count = 0;
                for dy in 0..2 {
                    for dx in 0..2 {
                        let sample = in_data[(2 * x + dx) + (2 * y + dy) * in_width];
                        if !sample.is_hole() {
                            block[count] = sample;
                            count += 1;
                        }
                    }
                }
                *out = if count == 0 {
                    T::HOLE
                } else {
                    T::mean(&block[..count])
                };
            }
        });
}

impl ImageEngine for CpuImageEngine {
    fn filter_subsample_with_holes(&self, output: &mut ImageMap<f32>, input: &ImageMap<f32>) {
        subsample_with_holes(output, input);
    }

    fn filter_subsample_vectors_with_holes(
        &self,
        output: &mut ImageMap<[f32; 4]>,
        input: &ImageMap<[f32; 4]>,
    ) {
        subsample_with_holes(output, input);
    }

    fn count_valid_depths(&self, depth: &ImageMap<f32>) -> usize {
        depth.data().par_iter().filter(|d| !d.is_hole()).count()
    }
}
