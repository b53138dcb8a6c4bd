//! On-disk record layouts: header codec and the tagged extra field store.

pub(crate) mod header;

mod extra;

pub use extra::{ExtraData, EXTRA_DATA_LIMIT};
