//! Storage formats and filename-extension detection.

use std::fmt::{Display, Formatter};

/// The physical storage family behind a series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    Hdf5,
    Adios2Bp,
    Adios2Bp4,
    Adios2Bp5,
    Adios2Sst,
    Adios2Ssc,
    Json,
    Toml,
    /// No storage attached; tasks are accepted and dropped.
    Dummy,
}

impl Format {
    /// Determine the format from a filename's extension. Unknown or missing
    /// extensions yield `None`.
    pub fn from_filename(filename: &str) -> Option<Self> {
        let extension = filename.rsplit_once('.')?.1;
        Self::from_extension(extension)
    }

    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension {
            "h5" => Some(Self::Hdf5),
            "bp" => Some(Self::Adios2Bp),
            "bp4" => Some(Self::Adios2Bp4),
            "bp5" => Some(Self::Adios2Bp5),
            "sst" => Some(Self::Adios2Sst),
            "ssc" => Some(Self::Adios2Ssc),
            "json" => Some(Self::Json),
            "toml" => Some(Self::Toml),
            _ => None,
        }
    }

    /// The canonical filename extension, without the leading dot.
    pub fn extension(&self) -> Option<&'static str> {
        match self {
            Self::Hdf5 => Some("h5"),
            Self::Adios2Bp => Some("bp"),
            Self::Adios2Bp4 => Some("bp4"),
            Self::Adios2Bp5 => Some("bp5"),
            Self::Adios2Sst => Some("sst"),
            Self::Adios2Ssc => Some("ssc"),
            Self::Json => Some("json"),
            Self::Toml => Some("toml"),
            Self::Dummy => None,
        }
    }

    /// Whether this format only moves data in whole IO steps and cannot seek
    /// backwards. Such engines coerce readers to linear access.
    pub fn is_streaming(&self) -> bool {
        matches!(self, Self::Adios2Sst | Self::Adios2Ssc)
    }

    /// The `backend` config key selecting this format family.
    pub fn from_backend_key(key: &str) -> Option<Self> {
        match key {
            "hdf5" => Some(Self::Hdf5),
            "adios2" => Some(Self::Adios2Bp),
            "json" => Some(Self::Json),
            "toml" => Some(Self::Toml),
            _ => None,
        }
    }
}

impl Display for Format {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let repr = match self {
            Self::Hdf5 => "HDF5",
            Self::Adios2Bp | Self::Adios2Bp4 | Self::Adios2Bp5 => "ADIOS2",
            Self::Adios2Sst => "ADIOS2_SST",
            Self::Adios2Ssc => "ADIOS2_SSC",
            Self::Json => "JSON",
            Self::Toml => "TOML",
            Self::Dummy => "DUMMY",
        };
        f.write_str(repr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_detection() {
        assert_eq!(Format::from_filename("data.h5"), Some(Format::Hdf5));
        assert_eq!(Format::from_filename("data_%T.bp5"), Some(Format::Adios2Bp5));
        assert_eq!(Format::from_filename("out.json"), Some(Format::Json));
        assert_eq!(Format::from_filename("noext"), None);
        assert_eq!(Format::from_filename("weird.xyz"), None);
    }

    #[test]
    fn streaming_engines() {
        assert!(Format::Adios2Sst.is_streaming());
        assert!(!Format::Json.is_streaming());
    }
}
