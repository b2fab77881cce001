//! Descriptor preparation engine
//!
//! Given a payload (through a [`Convertor`](crate::convertor::Convertor)) and
//! a [`ByteBudget`], picks a tier and either packs the payload into a pooled
//! slot or binds the fragment directly to registered caller memory.

pub mod engine;
pub mod rules;

pub use engine::DescriptorEngine;
pub use rules::{select_source_path, ByteBudget, SourceConditions, SourcePath};
