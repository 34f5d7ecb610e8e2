pub mod freshness;
pub mod merge;

pub use freshness::{categorize, freshness, CategoryGroup, FreshnessReport};
pub use merge::build_enrichment;
