//! Coalescing of adjacent chunks.

use pmd_types::{ChunkInfo, WrittenChunkInfo};
use std::collections::BTreeMap;

/// A slab that can be rebuilt with new geometry, so merging works over both
/// plain and source-tagged chunks.
pub trait Mergeable: Clone {
    fn offset(&self) -> &[u64];
    fn extent(&self) -> &[u64];
    fn rebuild(offset: Vec<u64>, extent: Vec<u64>, left: &Self, right: &Self) -> Self;
}

impl Mergeable for ChunkInfo {
    fn offset(&self) -> &[u64] {
        &self.offset
    }

    fn extent(&self) -> &[u64] {
        &self.extent
    }

    fn rebuild(offset: Vec<u64>, extent: Vec<u64>, _: &Self, _: &Self) -> Self {
        Self::new(offset, extent)
    }
}

impl Mergeable for WrittenChunkInfo {
    fn offset(&self) -> &[u64] {
        &self.offset
    }

    fn extent(&self) -> &[u64] {
        &self.extent
    }

    fn rebuild(offset: Vec<u64>, extent: Vec<u64>, left: &Self, right: &Self) -> Self {
        let source_id = if left.source_id == right.source_id {
            left.source_id
        } else {
            0
        };
        Self::new(offset, extent, source_id)
    }
}

/// Merge two chunks into a larger one if they tile exactly.
///
/// Two chunks are mergeable when they agree on offset and extent in all but
/// one dimension, and in that dimension one begins where the other ends.
fn try_merge<C: Mergeable>(chunk1: &C, chunk2: &C) -> Option<C> {
    let dimensionality = chunk1.extent().len();
    for dim in 0..dimensionality {
        let (c1, c2) = if chunk1.offset()[dim] > chunk2.offset()[dim] {
            (chunk2, chunk1)
        } else {
            (chunk1, chunk2)
        };
        // c1 begins at the lower offset; c2 must border it exactly
        if c2.offset()[dim] != c1.offset()[dim] + c1.extent()[dim] {
            continue;
        }
        let other_dims_equal = (0..dimensionality).filter(|j| *j != dim).all(|j| {
            c1.offset()[j] == c2.offset()[j] && c1.extent()[j] == c2.extent()[j]
        });
        if !other_dims_equal {
            continue;
        }
        let offset = c1.offset().to_vec();
        let mut extent = c1.extent().to_vec();
        extent[dim] += c2.extent()[dim];
        return Some(C::rebuild(offset, extent, c1, c2));
    }
    None
}

/// Repeatedly apply the pairwise merge until no pair of chunks in the table
/// can be merged any further.
pub fn merge_chunks<C: Mergeable>(table: &mut Vec<C>) {
    loop {
        let mut merged_pair = None;
        'scan: for i in 0..table.len() {
            for j in (i + 1)..table.len() {
                if let Some(merged) = try_merge(&table[i], &table[j]) {
                    merged_pair = Some((i, j, merged));
                    break 'scan;
                }
            }
        }
        match merged_pair {
            Some((i, j, merged)) => {
                // remove the higher index first
                table.swap_remove(j);
                table.swap_remove(i);
                table.push(merged);
            }
            None => break,
        }
    }
}

/// Group a chunk table by source ID and merge within each group.
pub fn merge_chunks_from_same_source_id(
    table: &[WrittenChunkInfo],
) -> BTreeMap<u32, Vec<ChunkInfo>> {
    let mut by_source: BTreeMap<u32, Vec<ChunkInfo>> = BTreeMap::new();
    for chunk in table {
        by_source
            .entry(chunk.source_id)
            .or_default()
            .push(chunk.chunk_info());
    }
    for chunks in by_source.values_mut() {
        merge_chunks(chunks);
    }
    by_source
}
