//! Access modes for a series.

use crate::{Error, Result};
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use tracing::warn;

/// How the storage behind a series may be touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Access {
    /// Open an existing series for reading, with random access to
    /// iterations.
    ReadOnly,
    /// Alias of [`Self::ReadOnly`] kept distinct so that streaming backends
    /// can refuse it explicitly.
    ReadRandomAccess,
    /// Read iterations strictly in stream order. The only read mode
    /// streaming engines can serve.
    ReadLinear,
    /// Open an existing series for reading and writing.
    ReadWrite,
    /// Create a new series, replacing whatever exists.
    Create,
    /// Add new iterations to an existing series without reading the ones
    /// already present.
    Append,
}

impl Access {
    pub fn is_read(&self) -> bool {
        matches!(
            self,
            Self::ReadOnly | Self::ReadRandomAccess | Self::ReadLinear
        )
    }

    pub fn is_write(&self) -> bool {
        !self.is_read()
    }

    /// Whether opening requires the storage to already exist.
    pub fn requires_existing(&self) -> bool {
        matches!(
            self,
            Self::ReadOnly | Self::ReadRandomAccess | Self::ReadLinear | Self::ReadWrite
        )
    }
}

impl Display for Access {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let repr = match self {
            Self::ReadOnly => "read_only",
            Self::ReadRandomAccess => "read_random_access",
            Self::ReadLinear => "read_linear",
            Self::ReadWrite => "read_write",
            Self::Create => "create",
            Self::Append => "append",
        };
        f.write_str(repr)
    }
}

impl FromStr for Access {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "read_only" => Ok(Self::ReadOnly),
            "read_random_access" => Ok(Self::ReadRandomAccess),
            "read_linear" => Ok(Self::ReadLinear),
            "read_write" => Ok(Self::ReadWrite),
            "create" => Ok(Self::Create),
            "append" => Ok(Self::Append),
            // pre-1.0 spellings, kept for configs written against them
            "readonly" => {
                warn!("access mode name \"readonly\" is deprecated, use \"read_only\"");
                Ok(Self::ReadOnly)
            }
            "readwrite" => {
                warn!("access mode name \"readwrite\" is deprecated, use \"read_write\"");
                Ok(Self::ReadWrite)
            }
            _ => Err(Error::UnknownAccess {
                input: s.to_owned(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(Access::ReadLinear.is_read());
        assert!(Access::Append.is_write());
        assert!(Access::ReadWrite.requires_existing());
        assert!(!Access::Create.requires_existing());
        assert!(!Access::Append.requires_existing());
    }

    #[test]
    fn parse_including_deprecated_names() {
        assert_eq!("read_only".parse::<Access>().unwrap(), Access::ReadOnly);
        assert_eq!("readonly".parse::<Access>().unwrap(), Access::ReadOnly);
        assert!("writeonly".parse::<Access>().is_err());
    }
}
