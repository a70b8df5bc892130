pub mod crypto;
pub mod error;
pub mod link;
pub mod manager;
pub mod package;
pub mod progress;
pub mod storage;
pub mod store;

pub use crate::{
    error::{ExchangeError, Result},
    link::{CloudExchangeLink, Destination, LinkEvents, LinkingState, ResourceInfo},
    manager::{CloudFileState, LinkManager},
};

/// Converts a buffer length for progress and size reporting.
#[must_use]
#[inline]
pub(crate) fn len_u64(len: usize) -> u64 {
    u64::try_from(len).unwrap_or(u64::MAX)
}
