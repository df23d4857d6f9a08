//! Federation engine for bibfed: schema mapping between the canonical
//! vocabulary and each source's native one, and the composition of mapper
//! and adapter into a single canonical query surface.
pub mod federation;
pub mod mapper;
