//! How iterations are laid out in storage.

use crate::{Error, Result};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// The three layouts for a series of iterations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IterationEncoding {
    /// Every iteration lives in its own file; the file name template
    /// carries a `%T` placeholder.
    FileBased,
    /// One file, one child group per iteration under the base path.
    GroupBased,
    /// One file, iterations encoded as successive IO steps of the same
    /// variables. Only step-aware backends can provide this.
    VariableBased,
}

impl IterationEncoding {
    /// The serialized spelling is part of the on-disk format.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FileBased => "fileBased",
            Self::GroupBased => "groupBased",
            Self::VariableBased => "variableBased",
        }
    }
}

impl Display for IterationEncoding {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IterationEncoding {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "fileBased" => Ok(Self::FileBased),
            "groupBased" => Ok(Self::GroupBased),
            "variableBased" => Ok(Self::VariableBased),
            _ => Err(Error::UnknownEncoding {
                input: s.to_owned(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spelling_round_trip() {
        for encoding in [
            IterationEncoding::FileBased,
            IterationEncoding::GroupBased,
            IterationEncoding::VariableBased,
        ] {
            assert_eq!(
                encoding.as_str().parse::<IterationEncoding>().unwrap(),
                encoding
            );
        }
        assert!("file_based".parse::<IterationEncoding>().is_err());
    }
}
