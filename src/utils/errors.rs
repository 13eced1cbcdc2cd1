use std::fmt;

/// Errors the core surfaces across the I/O boundary (spec error taxonomy §7:
/// input-data inconsistency, numerical degeneracy, and pool
/// interruption/resource errors). Programmer-contract violations (bad
/// indices, mismatched array lengths) are never wrapped here: they panic at
/// the call site that performs the unchecked access, matching "fatal, with
/// index/context reported; not recoverable."
#[derive(Debug, Clone)]
pub enum PhasingError {
    /// A marker carries an allele count of zero, or an allele index is
    /// outside `[0, A)` at construction time (not a later bit-pack bug).
    InvalidMarker { index: usize, reason: String },
    /// The marker list passed to `MarkerList::new` is not strictly
    /// increasing by (chrom, pos).
    MarkerOrdering { at_index: usize },
    /// The phased-overlap prefix supplied by the I/O layer disagrees with
    /// this window's own marker list.
    OverlapMismatch { reason: String },
    /// A window carries zero markers or zero samples.
    EmptyWindow,
    /// The genetic map could not produce monotone cM positions for this
    /// window's markers.
    UnparseableGeneticMap { reason: String },
    /// Numerical degeneracy the engine refuses to silently paper over (one
    /// sample with no reference panel, every allele at a marker rare, etc).
    Degenerate(String),
    /// A worker thread panicked, or a pool join was interrupted.
    PoolInterrupted(String),
}

impl fmt::Display for PhasingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PhasingError::InvalidMarker { index, reason } => {
                write!(f, "invalid marker at index {}: {}", index, reason)
            }
            PhasingError::MarkerOrdering { at_index } => write!(
                f,
                "marker list is not strictly increasing by (chrom, pos) at index {}",
                at_index
            ),
            PhasingError::OverlapMismatch { reason } => {
                write!(f, "phased-overlap prefix mismatch: {}", reason)
            }
            PhasingError::EmptyWindow => write!(f, "window has no markers or no samples"),
            PhasingError::UnparseableGeneticMap { reason } => {
                write!(f, "genetic map positions are unusable for this window: {}", reason)
            }
            PhasingError::Degenerate(msg) => write!(f, "numerical degeneracy: {}", msg),
            PhasingError::PoolInterrupted(msg) => write!(f, "worker pool interrupted: {}", msg),
        }
    }
}

impl std::error::Error for PhasingError {}

pub type PhasingResult<T> = Result<T, PhasingError>;
