//! Distributes the chunks written by one population of ranks onto another.
//!
//! A writer leaves behind a [`ChunkTable`] describing which slabs of a
//! dataset exist and who wrote them. A (possibly differently sized) reader
//! population turns that table into a per-rank load plan by running a
//! [`Strategy`]. Strategies compose: a [`PartialStrategy`] may leave
//! leftovers for a second pass, chained via [`FromPartialStrategy`].
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

mod host_info;
mod merge;
mod slicer;

pub use host_info::{by_method, by_method_collective, Communicator, Method, SingleProcess};
pub use merge::{merge_chunks, merge_chunks_from_same_source_id, Mergeable};
pub use slicer::{nth_block_inside, BlockSlicer, OneDimensionalBlockSlicer};

use pmd_types::{ChunkTable, Extent, WrittenChunkInfo};
use snafu::{ensure, Snafu};
use std::collections::BTreeMap;

#[derive(Debug, Snafu)]
#[allow(missing_docs)]
pub enum Error {
    #[snafu(display("no output ranks defined"))]
    NoOutputRanks,

    #[snafu(display("{} chunks remain unassigned after the terminal strategy", count))]
    UnassignedChunks { count: usize },

    #[snafu(display("unknown host info method \"{}\"", descr))]
    UnknownHostInfoMethod { descr: String },

    #[snafu(display("host info method {} is not available in this build", method))]
    HostInfoMethodUnavailable { method: &'static str },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Hostname (or any opaque locality tag) per rank.
pub type RankMeta = BTreeMap<u32, String>;

/// The load plan: which chunks each rank reads.
pub type Assignment = BTreeMap<u32, Vec<WrittenChunkInfo>>;

/// Intermediate state while strategies run: what is still to be assigned and
/// what has been placed already.
#[derive(Debug, Default, Clone)]
pub struct PartialAssignment {
    pub not_assigned: ChunkTable,
    pub assigned: Assignment,
}

impl PartialAssignment {
    pub fn new(not_assigned: ChunkTable) -> Self {
        Self {
            not_assigned,
            assigned: Assignment::new(),
        }
    }
}

/// A strategy that fully distributes its input.
pub trait Strategy: std::fmt::Debug + Send {
    fn assign(
        &self,
        partial: PartialAssignment,
        rank_in: &RankMeta,
        rank_out: &RankMeta,
    ) -> Result<Assignment>;

    fn clone_box(&self) -> Box<dyn Strategy>;

    /// Run on a fresh chunk table.
    fn assign_table(
        &self,
        table: ChunkTable,
        rank_in: &RankMeta,
        rank_out: &RankMeta,
    ) -> Result<Assignment> {
        ensure!(!rank_out.is_empty(), NoOutputRanksSnafu);
        self.assign(PartialAssignment::new(table), rank_in, rank_out)
    }
}

/// A strategy that may leave chunks unassigned.
pub trait PartialStrategy: std::fmt::Debug + Send {
    fn assign(
        &self,
        partial: PartialAssignment,
        rank_in: &RankMeta,
        rank_out: &RankMeta,
    ) -> Result<PartialAssignment>;

    fn clone_box(&self) -> Box<dyn PartialStrategy>;
}

/// Chains a first pass that may leave leftovers with a second pass that must
/// finish the job.
#[derive(Debug)]
pub struct FromPartialStrategy {
    first_pass: Box<dyn PartialStrategy>,
    second_pass: Box<dyn Strategy>,
}

impl FromPartialStrategy {
    pub fn new(first_pass: Box<dyn PartialStrategy>, second_pass: Box<dyn Strategy>) -> Self {
        Self {
            first_pass,
            second_pass,
        }
    }
}

impl Strategy for FromPartialStrategy {
    fn assign(
        &self,
        partial: PartialAssignment,
        rank_in: &RankMeta,
        rank_out: &RankMeta,
    ) -> Result<Assignment> {
        let after_first = self.first_pass.assign(partial, rank_in, rank_out)?;
        self.second_pass.assign(after_first, rank_in, rank_out)
    }

    fn clone_box(&self) -> Box<dyn Strategy> {
        Box::new(Self {
            first_pass: self.first_pass.clone_box(),
            second_pass: self.second_pass.clone_box(),
        })
    }
}

/// Assign chunks to output ranks in cyclic order.
#[derive(Debug, Clone, Copy, Default)]
pub struct RoundRobin;

impl Strategy for RoundRobin {
    fn assign(
        &self,
        partial: PartialAssignment,
        _rank_in: &RankMeta,
        rank_out: &RankMeta,
    ) -> Result<Assignment> {
        ensure!(!rank_out.is_empty(), NoOutputRanksSnafu);
        let PartialAssignment {
            not_assigned,
            mut assigned,
        } = partial;
        let mut ranks = rank_out.keys().copied().cycle();
        for mut chunk in not_assigned {
            let rank = ranks.next().expect("cycle over non-empty ranks");
            chunk.source_id = rank;
            assigned.entry(rank).or_default().push(chunk);
        }
        Ok(assigned)
    }

    fn clone_box(&self) -> Box<dyn Strategy> {
        Box::new(*self)
    }
}

/// Group chunks by their source rank and distribute whole groups in cyclic
/// order, preserving per-source locality.
#[derive(Debug, Clone, Copy, Default)]
pub struct RoundRobinOfSourceRanks;

impl Strategy for RoundRobinOfSourceRanks {
    fn assign(
        &self,
        partial: PartialAssignment,
        _rank_in: &RankMeta,
        rank_out: &RankMeta,
    ) -> Result<Assignment> {
        ensure!(!rank_out.is_empty(), NoOutputRanksSnafu);
        let PartialAssignment {
            not_assigned,
            mut assigned,
        } = partial;
        let mut by_source: BTreeMap<u32, Vec<WrittenChunkInfo>> = BTreeMap::new();
        for chunk in not_assigned {
            by_source.entry(chunk.source_id).or_default().push(chunk);
        }
        let mut sinks = rank_out.keys().copied().cycle();
        for (_, chunks) in by_source {
            let sink = sinks.next().expect("cycle over non-empty ranks");
            assigned.entry(sink).or_default().extend(chunks);
        }
        Ok(assigned)
    }

    fn clone_box(&self) -> Box<dyn Strategy> {
        Box::new(*self)
    }
}

/// This rank takes its contiguous block of the chunk list, as computed by
/// the deterministic partition rule.
#[derive(Debug, Clone, Copy)]
pub struct Blocks {
    rank: u32,
    size: u32,
}

impl Blocks {
    pub fn new(rank: u32, size: u32) -> Self {
        Self { rank, size }
    }
}

impl Strategy for Blocks {
    fn assign(
        &self,
        partial: PartialAssignment,
        _rank_in: &RankMeta,
        _rank_out: &RankMeta,
    ) -> Result<Assignment> {
        let PartialAssignment {
            not_assigned,
            mut assigned,
        } = partial;
        let (from, count) = nth_block_inside(
            not_assigned.len() as u64,
            u64::from(self.rank),
            u64::from(self.size),
        );
        let mine = not_assigned
            .into_iter()
            .skip(from as usize)
            .take(count as usize);
        assigned.entry(self.rank).or_default().extend(mine);
        Ok(assigned)
    }

    fn clone_box(&self) -> Box<dyn Strategy> {
        Box::new(*self)
    }
}

/// Like [`Blocks`], but the partition runs over the set of distinct source
/// ranks rather than over single chunks.
#[derive(Debug, Clone, Copy)]
pub struct BlocksOfSourceRanks {
    rank: u32,
    size: u32,
}

impl BlocksOfSourceRanks {
    pub fn new(rank: u32, size: u32) -> Self {
        Self { rank, size }
    }
}

impl Strategy for BlocksOfSourceRanks {
    fn assign(
        &self,
        partial: PartialAssignment,
        _rank_in: &RankMeta,
        _rank_out: &RankMeta,
    ) -> Result<Assignment> {
        let PartialAssignment {
            not_assigned,
            mut assigned,
        } = partial;
        let mut by_source: BTreeMap<u32, Vec<WrittenChunkInfo>> = BTreeMap::new();
        for chunk in not_assigned {
            by_source.entry(chunk.source_id).or_default().push(chunk);
        }
        let (from, count) = nth_block_inside(
            by_source.len() as u64,
            u64::from(self.rank),
            u64::from(self.size),
        );
        let mine = by_source
            .into_values()
            .skip(from as usize)
            .take(count as usize)
            .flatten();
        assigned.entry(self.rank).or_default().extend(mine);
        Ok(assigned)
    }

    fn clone_box(&self) -> Box<dyn Strategy> {
        Box::new(*self)
    }
}

/// Keep chunks on the host that wrote them: groups chunks by source
/// hostname and lets an inner strategy distribute each group among the
/// output ranks of the same host. Groups without a same-host reader fall
/// through as leftovers.
#[derive(Debug)]
pub struct ByHostname {
    within_node: Box<dyn Strategy>,
}

impl ByHostname {
    pub fn new(within_node: Box<dyn Strategy>) -> Self {
        Self { within_node }
    }
}

impl PartialStrategy for ByHostname {
    fn assign(
        &self,
        partial: PartialAssignment,
        rank_in: &RankMeta,
        rank_out: &RankMeta,
    ) -> Result<PartialAssignment> {
        let PartialAssignment {
            not_assigned,
            mut assigned,
        } = partial;

        // chunks by the hostname of their writer; unknown writers are
        // leftover right away
        let mut chunk_groups: BTreeMap<&str, Vec<WrittenChunkInfo>> = BTreeMap::new();
        let mut leftover = Vec::new();
        for chunk in not_assigned {
            match rank_in.get(&chunk.source_id) {
                Some(hostname) => chunk_groups.entry(hostname).or_default().push(chunk),
                None => leftover.push(chunk),
            }
        }

        // which output ranks live on which host
        let mut ranks_per_host_sink: BTreeMap<&str, RankMeta> = BTreeMap::new();
        for (rank, hostname) in rank_out {
            ranks_per_host_sink
                .entry(hostname)
                .or_default()
                .insert(*rank, hostname.clone());
        }

        for (hostname, chunks) in chunk_groups {
            match ranks_per_host_sink.get(hostname) {
                Some(ranks_on_node) if !ranks_on_node.is_empty() => {
                    assigned = self.within_node.assign(
                        PartialAssignment {
                            not_assigned: chunks,
                            assigned: std::mem::take(&mut assigned),
                        },
                        rank_in,
                        ranks_on_node,
                    )?;
                }
                _ => leftover.extend(chunks),
            }
        }

        Ok(PartialAssignment {
            not_assigned: leftover,
            assigned,
        })
    }

    fn clone_box(&self) -> Box<dyn PartialStrategy> {
        Box::new(Self {
            within_node: self.within_node.clone_box(),
        })
    }
}

/// Intersect every chunk with this rank's hyperslab of the total extent and
/// keep the non-empty intersections.
#[derive(Debug)]
pub struct ByCuboidSlice {
    block_slicer: Box<dyn BlockSlicer>,
    total_extent: Extent,
    rank: u32,
    size: u32,
}

impl ByCuboidSlice {
    pub fn new(
        block_slicer: Box<dyn BlockSlicer>,
        total_extent: Extent,
        rank: u32,
        size: u32,
    ) -> Self {
        Self {
            block_slicer,
            total_extent,
            rank,
            size,
        }
    }
}

impl Strategy for ByCuboidSlice {
    fn assign(
        &self,
        partial: PartialAssignment,
        _rank_in: &RankMeta,
        _rank_out: &RankMeta,
    ) -> Result<Assignment> {
        let PartialAssignment {
            not_assigned,
            mut assigned,
        } = partial;
        let (my_offset, my_extent) =
            self.block_slicer
                .slice_block(&self.total_extent, self.size, self.rank);
        for chunk in not_assigned {
            let mut clipped = chunk.chunk_info();
            clipped.restrict_to(&my_offset, &my_extent);
            if clipped.is_empty() {
                continue;
            }
            assigned
                .entry(self.rank)
                .or_default()
                .push(WrittenChunkInfo::new(
                    clipped.offset,
                    clipped.extent,
                    chunk.source_id,
                ));
        }
        Ok(assigned)
    }

    fn clone_box(&self) -> Box<dyn Strategy> {
        Box::new(Self {
            block_slicer: self.block_slicer.clone_box(),
            total_extent: self.total_extent.clone(),
            rank: self.rank,
            size: self.size,
        })
    }
}

#[derive(Debug, Clone)]
struct SizedChunk {
    chunk: WrittenChunkInfo,
    data_size: u64,
}

/// Slice chunks along `dimension` into pieces of at most `max_size` points
/// and sort the pieces by decreasing size.
///
/// Pieces may exceed `max_size` when a hyperslab of thickness 1 is already
/// larger than that. Zero-sized chunks are dropped with a warning.
fn split_to_size_sorted(table: &[WrittenChunkInfo], max_size: u64, dimension: usize) -> Vec<SizedChunk> {
    let mut result = Vec::new();
    for chunk in table {
        let slice_size: u64 = chunk
            .extent
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != dimension)
            .map(|(_, e)| *e)
            .product();
        if slice_size == 0 || chunk.extent[dimension] == 0 {
            tracing::warn!("dropping zero-sized chunk while splitting for bin packing");
            continue;
        }

        // this many slices fit one piece before it exceeds max_size
        let streak_length = (max_size / slice_size).max(1);
        let sliced_dimension_extent = chunk.extent[dimension];

        let mut current_position = 0;
        loop {
            let mut piece = chunk.clone();
            piece.offset[dimension] += current_position;
            if current_position + streak_length >= sliced_dimension_extent {
                piece.extent[dimension] = sliced_dimension_extent - current_position;
                let data_size = piece.extent[dimension] * slice_size;
                result.push(SizedChunk {
                    chunk: piece,
                    data_size,
                });
                break;
            }
            piece.extent[dimension] = streak_length;
            result.push(SizedChunk {
                chunk: piece,
                data_size: streak_length * slice_size,
            });
            current_position += streak_length;
        }
    }
    result.sort_by(|left, right| right.data_size.cmp(&left.data_size));
    result
}

/// Greedy two-pass bin packing.
///
/// Chunks are split along one dimension into pieces no larger than the ideal
/// per-rank share, sorted by decreasing size, and handed out greedily. Each
/// pass fills every rank up to the ideal share with the largest still-fitting
/// pieces; running the pass twice guarantees full distribution with at most
/// twice the ideal load per rank.
#[derive(Debug, Clone, Copy)]
pub struct BinPacking {
    split_along_dimension: usize,
}

impl BinPacking {
    pub fn new(split_along_dimension: usize) -> Self {
        Self {
            split_along_dimension,
        }
    }
}

impl Default for BinPacking {
    fn default() -> Self {
        Self::new(0)
    }
}

impl Strategy for BinPacking {
    fn assign(
        &self,
        partial: PartialAssignment,
        _rank_in: &RankMeta,
        rank_out: &RankMeta,
    ) -> Result<Assignment> {
        ensure!(!rank_out.is_empty(), NoOutputRanksSnafu);
        let PartialAssignment {
            not_assigned,
            mut assigned,
        } = partial;
        let total_points: u64 = not_assigned.iter().map(WrittenChunkInfo::num_points).sum();
        let ideal_size = total_points / rank_out.len() as u64;
        // If chunks cannot be sliced small enough the distribution still
        // completes, only the factor-2 bound is lost.
        let mut digestible =
            split_to_size_sorted(&not_assigned, ideal_size, self.split_along_dimension);

        // One greedy pass: fill each rank with the largest pieces that
        // still fit its remaining share. Running the pass twice yields a
        // factor-two approximation of optimal bin packing.
        let mut worker = |assigned: &mut Assignment| {
            for dest_rank in rank_out.keys() {
                let mut leftover_size = ideal_size;
                let mut index = 0;
                while index < digestible.len() {
                    let size = digestible[index].data_size;
                    if size >= ideal_size {
                        // only happens when slicing could not reach the
                        // ideal size; the piece fills this rank by itself
                        let piece = digestible.remove(index);
                        assigned.entry(*dest_rank).or_default().push(piece.chunk);
                        break;
                    } else if size <= leftover_size {
                        let piece = digestible.remove(index);
                        assigned.entry(*dest_rank).or_default().push(piece.chunk);
                        leftover_size -= size;
                    } else {
                        index += 1;
                    }
                }
            }
        };
        worker(&mut assigned);
        worker(&mut assigned);

        Ok(assigned)
    }

    fn clone_box(&self) -> Box<dyn Strategy> {
        Box::new(*self)
    }
}

/// Terminal strategy that insists on an empty leftover set.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingStrategy;

impl Strategy for FailingStrategy {
    fn assign(
        &self,
        partial: PartialAssignment,
        _rank_in: &RankMeta,
        _rank_out: &RankMeta,
    ) -> Result<Assignment> {
        ensure!(
            partial.not_assigned.is_empty(),
            UnassignedChunksSnafu {
                count: partial.not_assigned.len(),
            }
        );
        Ok(partial.assigned)
    }

    fn clone_box(&self) -> Box<dyn Strategy> {
        Box::new(*self)
    }
}

/// Terminal strategy that drops leftovers on purpose.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscardingStrategy;

impl Strategy for DiscardingStrategy {
    fn assign(
        &self,
        partial: PartialAssignment,
        _rank_in: &RankMeta,
        _rank_out: &RankMeta,
    ) -> Result<Assignment> {
        Ok(partial.assigned)
    }

    fn clone_box(&self) -> Box<dyn Strategy> {
        Box::new(*self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn written(offset: &[u64], extent: &[u64], source: u32) -> WrittenChunkInfo {
        WrittenChunkInfo::new(offset.to_vec(), extent.to_vec(), source)
    }

    fn ranks(n: u32) -> RankMeta {
        (0..n).map(|r| (r, format!("host{r}"))).collect()
    }

    fn same_host_ranks(n: u32, host: &str) -> RankMeta {
        (0..n).map(|r| (r, host.to_owned())).collect()
    }

    fn assigned_points(assignment: &Assignment) -> u64 {
        assignment
            .values()
            .flatten()
            .map(WrittenChunkInfo::num_points)
            .sum()
    }

    #[test]
    fn round_robin_covers_every_chunk_exactly_once() {
        let table: ChunkTable = (0..7).map(|i| written(&[i], &[1], 0)).collect();
        let assignment = RoundRobin.assign_table(table.clone(), &ranks(1), &ranks(3)).unwrap();

        let total: usize = assignment.values().map(Vec::len).sum();
        assert_eq!(total, table.len());
        assert_eq!(assignment[&0].len(), 3);
        assert_eq!(assignment[&1].len(), 2);
        assert_eq!(assignment[&2].len(), 2);
    }

    #[test]
    fn round_robin_of_source_ranks_keeps_groups_together() {
        let table = vec![
            written(&[0], &[2], 0),
            written(&[2], &[2], 0),
            written(&[4], &[2], 1),
            written(&[6], &[2], 2),
        ];
        let assignment = RoundRobinOfSourceRanks
            .assign_table(table, &ranks(3), &ranks(2))
            .unwrap();
        // sources 0 and 2 land on sink 0, source 1 on sink 1
        assert_eq!(assignment[&0].len(), 3);
        assert_eq!(assignment[&1].len(), 1);
    }

    #[test]
    fn blocks_take_contiguous_ranges() {
        let table: ChunkTable = (0..10).map(|i| written(&[i], &[1], 0)).collect();
        let assignment = Blocks::new(1, 3).assign_table(table, &ranks(1), &ranks(3)).unwrap();
        let mine = &assignment[&1];
        assert_eq!(mine.len(), 3);
        assert_eq!(mine[0].offset, vec![4]);
        assert_eq!(mine[2].offset, vec![6]);
    }

    #[test]
    fn cuboid_slice_intersects_incoming_chunks() {
        // total extent [10], two ranks, incoming chunk covering 3..7
        let table = vec![written(&[3], &[4], 0)];
        let rank0 = ByCuboidSlice::new(
            Box::new(OneDimensionalBlockSlicer::new(0)),
            vec![10],
            0,
            2,
        );
        let rank1 = ByCuboidSlice::new(
            Box::new(OneDimensionalBlockSlicer::new(0)),
            vec![10],
            1,
            2,
        );
        let a0 = rank0.assign_table(table.clone(), &ranks(1), &ranks(2)).unwrap();
        let a1 = rank1.assign_table(table, &ranks(1), &ranks(2)).unwrap();
        assert_eq!(a0[&0], vec![written(&[3], &[2], 0)]);
        assert_eq!(a1[&1], vec![written(&[5], &[2], 0)]);
    }

    #[test]
    fn cuboid_slice_assigns_subsets_of_the_hyperslab() {
        let table = vec![
            written(&[0, 0], &[6, 6], 0),
            written(&[6, 0], &[4, 6], 1),
        ];
        let slicer = OneDimensionalBlockSlicer::new(0);
        let (my_offset, my_extent) = slicer.slice_block(&vec![10, 6], 2, 0);
        let strategy = ByCuboidSlice::new(Box::new(slicer), vec![10, 6], 0, 2);
        let assignment = strategy.assign_table(table, &ranks(2), &ranks(2)).unwrap();
        for chunk in &assignment[&0] {
            for d in 0..2 {
                assert!(chunk.offset[d] >= my_offset[d]);
                assert!(chunk.offset[d] + chunk.extent[d] <= my_offset[d] + my_extent[d]);
            }
        }
    }

    #[test]
    fn bin_packing_respects_the_factor_two_bound() {
        // sizes 10, 7, 5, 3, 3, 2 onto 3 ranks; ideal = 10
        let table = vec![
            written(&[0], &[10], 0),
            written(&[10], &[7], 0),
            written(&[17], &[5], 1),
            written(&[22], &[3], 1),
            written(&[25], &[3], 2),
            written(&[28], &[2], 2),
        ];
        let total: u64 = table.iter().map(WrittenChunkInfo::num_points).sum();
        assert_eq!(total, 30);

        let assignment = BinPacking::new(0)
            .assign_table(table, &ranks(3), &ranks(3))
            .unwrap();
        assert_eq!(assigned_points(&assignment), total);
        for chunks in assignment.values() {
            let load: u64 = chunks.iter().map(WrittenChunkInfo::num_points).sum();
            assert!(load <= 20, "rank load {load} exceeds 2 * ideal");
        }
    }

    #[test]
    fn bin_packing_is_deterministic() {
        let table = vec![
            written(&[0], &[9], 0),
            written(&[9], &[4], 1),
            written(&[13], &[4], 1),
        ];
        let a = BinPacking::new(0)
            .assign_table(table.clone(), &ranks(2), &ranks(2))
            .unwrap();
        let b = BinPacking::new(0)
            .assign_table(table, &ranks(2), &ranks(2))
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn by_hostname_keeps_local_chunks_and_leaves_the_rest() {
        let mut rank_in = RankMeta::new();
        rank_in.insert(0, "nodeA".to_owned());
        rank_in.insert(1, "nodeB".to_owned());
        let rank_out = same_host_ranks(2, "nodeA");

        let table = vec![written(&[0], &[4], 0), written(&[4], &[4], 1)];
        let partial = ByHostname::new(Box::new(RoundRobin))
            .assign(PartialAssignment::new(table), &rank_in, &rank_out)
            .unwrap();

        // nodeA's chunk was distributed, nodeB's has no same-host reader
        assert_eq!(partial.not_assigned, vec![written(&[4], &[4], 1)]);
        let placed: usize = partial.assigned.values().map(Vec::len).sum();
        assert_eq!(placed, 1);
    }

    #[test]
    fn from_partial_chains_into_a_full_assignment() {
        let mut rank_in = RankMeta::new();
        rank_in.insert(0, "nodeA".to_owned());
        rank_in.insert(1, "nodeB".to_owned());
        let rank_out = same_host_ranks(2, "nodeA");

        let table = vec![written(&[0], &[4], 0), written(&[4], &[4], 1)];
        let strategy = FromPartialStrategy::new(
            Box::new(ByHostname::new(Box::new(RoundRobin))),
            Box::new(RoundRobin),
        );
        let assignment = strategy
            .assign_table(table.clone(), &rank_in, &rank_out)
            .unwrap();
        let placed: usize = assignment.values().map(Vec::len).sum();
        assert_eq!(placed, table.len());
    }

    #[test]
    fn failing_strategy_rejects_leftovers() {
        let partial = PartialAssignment::new(vec![written(&[0], &[1], 0)]);
        let err = FailingStrategy
            .assign(partial, &ranks(1), &ranks(1))
            .unwrap_err();
        assert!(matches!(err, Error::UnassignedChunks { count: 1 }));

        let empty = PartialAssignment::new(Vec::new());
        assert!(FailingStrategy.assign(empty, &ranks(1), &ranks(1)).is_ok());
    }

    #[test]
    fn discarding_strategy_drops_leftovers() {
        let partial = PartialAssignment::new(vec![written(&[0], &[1], 0)]);
        let assignment = DiscardingStrategy
            .assign(partial, &ranks(1), &ranks(1))
            .unwrap();
        assert!(assignment.is_empty());
    }

    #[test]
    fn empty_output_population_is_an_error() {
        let err = RoundRobin
            .assign_table(vec![written(&[0], &[1], 0)], &ranks(1), &RankMeta::new())
            .unwrap_err();
        assert!(matches!(err, Error::NoOutputRanks));
    }

    #[test]
    fn merged_quadrants_feed_strategies() {
        let mut table = vec![
            written(&[0, 0], &[4, 4], 0),
            written(&[4, 0], &[4, 4], 0),
            written(&[0, 4], &[4, 4], 0),
            written(&[4, 4], &[4, 4], 0),
        ];
        merge_chunks(&mut table);
        assert_eq!(
            table,
            vec![WrittenChunkInfo::new(vec![0, 0], vec![8, 8], 0)]
        );
    }
}
