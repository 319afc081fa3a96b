//! Per-URL audit of product pages.
//!
//! [`PageScorer`] turns a URL into a [`ProductRecord`]: structure flags,
//! policy tiers, identifier tier, rating fields and the two weighted scores.

pub mod record;
pub mod scorer;
pub mod signals;

pub use record::{PolicyTier, ProductRecord, RecordRating};
pub use scorer::{AuditError, PageScorer, UrlTarget};
pub use signals::StructureSignals;
