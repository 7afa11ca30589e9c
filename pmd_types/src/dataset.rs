//! Dataset descriptors and slab geometry checks.

use crate::{Datatype, Error, ExtentShrinksSnafu, OutOfBoundsSnafu, RankMismatchSnafu, Result};
use snafu::ensure;

/// Global size of a dataset, one entry per dimension.
pub type Extent = Vec<u64>;

/// Origin of a slab inside a dataset, one entry per dimension.
pub type Offset = Vec<u64>;

/// Description of one N-dimensional, homogeneously typed dataset, plus the
/// per-dataset hints a backend may honor.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    pub dtype: Datatype,
    pub extent: Extent,
    /// Preferred backend chunking, if any.
    pub chunk_size: Option<Extent>,
    /// Named compression to request from the backend.
    pub compression: Option<String>,
    /// Named transforms to request from the backend.
    pub transform: Option<String>,
    /// Backend-specific options, JSON-encoded.
    pub options: String,
}

impl Dataset {
    pub fn new(dtype: Datatype, extent: Extent) -> Self {
        Self {
            dtype,
            extent,
            chunk_size: None,
            compression: None,
            transform: None,
            options: "{}".to_owned(),
        }
    }

    pub fn rank(&self) -> usize {
        self.extent.len()
    }

    /// Whether any dimension is zero, i.e. the dataset holds no points.
    pub fn is_degenerate(&self) -> bool {
        self.extent.iter().any(|&d| d == 0)
    }

    pub fn num_points(&self) -> u64 {
        self.extent.iter().product()
    }

    /// Grow the dataset to `extent`. The rank must match and no dimension
    /// may shrink.
    pub fn extend(&mut self, extent: Extent) -> Result<()> {
        ensure!(
            extent.len() == self.extent.len(),
            RankMismatchSnafu {
                dataset: self.extent.len(),
                request: extent.len(),
            }
        );
        for (dimension, (old, new)) in self.extent.iter().zip(extent.iter()).enumerate() {
            ensure!(
                new >= old,
                ExtentShrinksSnafu {
                    dimension,
                    from: *old,
                    to: *new,
                }
            );
        }
        self.extent = extent;
        Ok(())
    }

    /// Check that the slab `(offset, extent)` lies fully inside this
    /// dataset.
    pub fn check_slab(&self, offset: &[u64], extent: &[u64]) -> Result<()> {
        ensure!(
            offset.len() == self.extent.len() && extent.len() == self.extent.len(),
            RankMismatchSnafu {
                dataset: self.extent.len(),
                request: offset.len().max(extent.len()),
            }
        );
        for (dimension, ((o, e), total)) in offset
            .iter()
            .zip(extent.iter())
            .zip(self.extent.iter())
            .enumerate()
        {
            let end = o.checked_add(*e).ok_or(Error::OutOfBounds {
                offset: *o,
                end: u64::MAX,
                total: *total,
                dimension,
            })?;
            ensure!(
                end <= *total,
                OutOfBoundsSnafu {
                    offset: *o,
                    end,
                    total: *total,
                    dimension,
                }
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extend_grows_only() {
        let mut d = Dataset::new(Datatype::Double, vec![4, 4]);
        d.extend(vec![8, 4]).unwrap();
        assert_eq!(d.extent, vec![8, 4]);

        let err = d.extend(vec![8, 2]).unwrap_err();
        assert!(matches!(err, Error::ExtentShrinks { dimension: 1, .. }));

        let err = d.extend(vec![8]).unwrap_err();
        assert!(matches!(err, Error::RankMismatch { .. }));
    }

    #[test]
    fn slab_bounds() {
        let d = Dataset::new(Datatype::Float, vec![10, 10]);
        d.check_slab(&[2, 3], &[8, 7]).unwrap();
        assert!(d.check_slab(&[2, 3], &[9, 7]).is_err());
        assert!(d.check_slab(&[0], &[10]).is_err());
        // offset + extent overflowing u64 must not wrap into bounds
        assert!(d.check_slab(&[u64::MAX, 0], &[2, 1]).is_err());
    }

    #[test]
    fn degenerate_extents() {
        assert!(Dataset::new(Datatype::Int, vec![3, 0]).is_degenerate());
        assert!(!Dataset::new(Datatype::Int, vec![3, 1]).is_degenerate());
        assert_eq!(Dataset::new(Datatype::Int, vec![3, 0]).num_points(), 0);
    }
}
