//! Secondary indexes for repodb collections.
//!
//! An index maps field name -> field value -> the records holding that
//! value. Indexes are a derived cache over the authoritative record list:
//! they can be dropped and rebuilt at any time.
//!
//! # Key Types
//!
//! - [`SecondaryIndex`] -- per-field equality buckets over shared records
//! - [`IndexKey`] -- canonical, hashable form of a JSON field value

pub mod index;
pub mod key;

pub use index::SecondaryIndex;
pub use key::IndexKey;
