// Copyright 2026 LAR Screener Contributors
// SPDX-License-Identifier: Apache-2.0

//! LAR screener: structured-data audit of retailer product pages and the
//! composite LAR score built from it.
//!
//! Pipeline: URL list → [`audit::PageScorer`] (fetch, JSON-LD, rating
//! fallbacks, optional JS render) → audit report → [`lar::LarCalculator`]
//! → per-domain LAR and attribution tables.

pub mod acquisition;
pub mod audit;
pub mod config;
pub mod discovery;
pub mod lar;
pub mod monitor;
pub mod renderer;
pub mod report;

pub use audit::{PageScorer, ProductRecord, UrlTarget};
pub use config::ScreenerConfig;
pub use lar::{LarCalculator, LarInputs};
