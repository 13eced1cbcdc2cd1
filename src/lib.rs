//! PBWT and Li-Stephens HMM haplotype phasing core. A window reader (out of
//! scope for this crate) hands a [`model::window::WindowInput`] to
//! [`engine::PhasingEngine::phase_window`], which returns per-marker phased
//! genotypes plus rare-allele carrier lists for the next window's stage.

pub mod composite;
pub mod engine;
pub mod haplotype;
pub mod hmm;
pub mod ibs2;
pub mod model;
pub mod pbwt;
pub mod phase;
pub mod utils;

pub use engine::{PhasingEngine, WindowResult};
pub use model::config::PhasingParameters;
pub use model::window::WindowInput;
pub use utils::errors::{PhasingError, PhasingResult};
