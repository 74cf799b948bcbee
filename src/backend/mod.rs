pub mod cache;
pub mod data_sources;
pub mod mangadex;
pub mod media_cache;
pub mod muting;
