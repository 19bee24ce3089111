//! Link id generators.
//!
//! Generators are pure: they know nothing about stored ids, so callers own
//! collision detection and retry.

pub mod error;
pub mod random;
pub mod seq;

use burrow_core::LinkId;

pub use error::GeneratorError;
pub use random::RandomGenerator;
pub use seq::SeqGenerator;

/// Trait for generating link ids.
pub trait Generator: Send + Sync + 'static {
    /// Produces a well-formed candidate id, or fails without producing one.
    fn generate(&self) -> Result<LinkId, GeneratorError>;
}

impl<G: Generator + ?Sized> Generator for Box<G> {
    fn generate(&self) -> Result<LinkId, GeneratorError> {
        (**self).generate()
    }
}

impl<G: Generator + ?Sized> Generator for std::sync::Arc<G> {
    fn generate(&self) -> Result<LinkId, GeneratorError> {
        (**self).generate()
    }
}
