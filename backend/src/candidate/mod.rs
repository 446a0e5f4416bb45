pub mod cache;

pub use cache::{CACHE_SCHEMA_VERSION, CachedCandidate, CandidateCache, filter_candidates};
