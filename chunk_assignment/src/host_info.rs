//! Locality information about the ranks participating in a transfer.

use crate::{Error, RankMeta, Result};
use std::fmt::Debug;

/// How a rank determines the hostname it runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    PosixHostname,
    MpiProcessorName,
}

impl Method {
    /// Resolve a string identifier to a method. `"hostname"` picks the MPI
    /// flavor when the caller can provide one, else POSIX.
    pub fn from_string_description(descr: &str, consider_mpi: bool) -> Result<Self> {
        match descr {
            "posix_hostname" => Ok(Self::PosixHostname),
            "mpi_processor_name" => Ok(Self::MpiProcessorName),
            "hostname" => {
                if consider_mpi && Self::MpiProcessorName.available() {
                    Ok(Self::MpiProcessorName)
                } else {
                    Ok(Self::PosixHostname)
                }
            }
            _ => Err(Error::UnknownHostInfoMethod {
                descr: descr.to_owned(),
            }),
        }
    }

    /// Whether this build can execute the method.
    pub fn available(&self) -> bool {
        match self {
            Self::PosixHostname => cfg!(unix),
            // no MPI linked into this build; the capability comes from a
            // Communicator implementation instead
            Self::MpiProcessorName => false,
        }
    }
}

/// This process' hostname via the given method.
pub fn by_method(method: Method) -> Result<String> {
    match method {
        Method::PosixHostname => Ok(gethostname::gethostname().to_string_lossy().into_owned()),
        Method::MpiProcessorName => Err(Error::HostInfoMethodUnavailable {
            method: "mpi_processor_name",
        }),
    }
}

/// The group-communication capability the library needs from a parallel
/// runtime: a rank, a group size and a collective string gather. MPI-backed
/// implementations live outside this crate.
pub trait Communicator: Debug + Send + Sync {
    fn rank(&self) -> u32;

    fn size(&self) -> u32;

    /// Collectively gather one string per rank; every rank receives the full
    /// list, indexed by rank.
    fn all_gather(&self, value: &str) -> Vec<String>;
}

/// The trivial communicator of a serial program.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleProcess;

impl Communicator for SingleProcess {
    fn rank(&self) -> u32 {
        0
    }

    fn size(&self) -> u32 {
        1
    }

    fn all_gather(&self, value: &str) -> Vec<String> {
        vec![value.to_owned()]
    }
}

/// Collectively determine every rank's hostname.
pub fn by_method_collective(comm: &dyn Communicator, method: Method) -> Result<RankMeta> {
    let mine = by_method(method)?;
    let all = comm.all_gather(&mine);
    Ok(all
        .into_iter()
        .enumerate()
        .map(|(rank, hostname)| (rank as u32, hostname))
        .collect())
}
