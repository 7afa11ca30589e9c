//! Chunk geometry: slabs of a dataset, optionally tagged with the rank that
//! produced them.

use crate::{Extent, Offset};

/// One `(offset, extent)` slab of a dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkInfo {
    pub offset: Offset,
    pub extent: Extent,
}

impl ChunkInfo {
    pub fn new(offset: Offset, extent: Extent) -> Self {
        Self { offset, extent }
    }

    pub fn rank(&self) -> usize {
        self.extent.len()
    }

    pub fn num_points(&self) -> u64 {
        self.extent.iter().product()
    }

    /// Whether any dimension of the slab is empty.
    pub fn is_empty(&self) -> bool {
        self.extent.iter().any(|&e| e == 0)
    }

    /// Clip this slab to the given selection, dimension-wise.
    ///
    /// Per dimension the result begins at the larger offset and ends at the
    /// smaller end; a selection that does not overlap yields a zero extent
    /// in that dimension.
    pub fn restrict_to(&mut self, within_offset: &[u64], within_extent: &[u64]) {
        for i in 0..self.offset.len() {
            if self.offset[i] < within_offset[i] {
                let delta = within_offset[i] - self.offset[i];
                self.offset[i] = within_offset[i];
                self.extent[i] = self.extent[i].saturating_sub(delta);
            }
            let end = self.offset[i] + self.extent[i];
            let within_end = within_offset[i] + within_extent[i];
            if end > within_end {
                let delta = end - within_end;
                self.extent[i] = self.extent[i].saturating_sub(delta);
            }
        }
    }
}

/// A [`ChunkInfo`] annotated with an opaque ID of the writing data source,
/// usually its MPI rank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenChunkInfo {
    pub offset: Offset,
    pub extent: Extent,
    pub source_id: u32,
}

impl WrittenChunkInfo {
    pub fn new(offset: Offset, extent: Extent, source_id: u32) -> Self {
        Self {
            offset,
            extent,
            source_id,
        }
    }

    pub fn chunk_info(&self) -> ChunkInfo {
        ChunkInfo::new(self.offset.clone(), self.extent.clone())
    }

    pub fn num_points(&self) -> u64 {
        self.extent.iter().product()
    }
}

impl From<ChunkInfo> for WrittenChunkInfo {
    fn from(chunk: ChunkInfo) -> Self {
        Self::new(chunk.offset, chunk.extent, 0)
    }
}

/// The set of chunks available for a dataset, as reported by a backend.
pub type ChunkTable = Vec<WrittenChunkInfo>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restriction_clips_both_sides() {
        let mut chunk = ChunkInfo::new(vec![3], vec![4]);
        chunk.restrict_to(&[0], &[5]);
        assert_eq!(chunk, ChunkInfo::new(vec![3], vec![2]));

        let mut chunk = ChunkInfo::new(vec![3], vec![4]);
        chunk.restrict_to(&[5], &[5]);
        assert_eq!(chunk, ChunkInfo::new(vec![5], vec![2]));
    }

    #[test]
    fn disjoint_restriction_is_empty() {
        let mut chunk = ChunkInfo::new(vec![0, 0], vec![2, 2]);
        chunk.restrict_to(&[4, 0], &[2, 2]);
        assert!(chunk.is_empty());
    }

    #[test]
    fn source_id_defaults_to_zero() {
        let written: WrittenChunkInfo = ChunkInfo::new(vec![1], vec![2]).into();
        assert_eq!(written.source_id, 0);
    }
}
