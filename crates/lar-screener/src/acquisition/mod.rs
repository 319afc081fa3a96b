//! Signal acquisition from retailer pages.
//!
//! Everything here turns a URL or raw HTML into signals: JSON-LD graphs,
//! ratings, policy links. Extraction never fails outward; unparseable input
//! simply yields nothing. Only the HTTP and browser layers report errors.

pub mod fallback;
pub mod http_client;
pub mod js_fallback;
pub mod microdata;
pub mod policy;
pub mod rating;
pub mod sitemap;
pub mod structured;
