use crate::cell::CellError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced while loading a structure or analysing it.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Cell(#[from] CellError),

    #[error("system contains no atoms")]
    EmptySystem,

    /// An atom position contains NaN or infinity.
    #[error("atom {index} has a non-finite position")]
    InvalidPosition { index: usize },

    /// An atom lies outside the box along a non-periodic axis.
    #[error("atom {index} lies outside the box along non-periodic axis {axis}")]
    OutsideBox { index: usize, axis: usize },

    #[error("cutoff must be positive and finite, got {0}")]
    InvalidCutoff(f64),

    #[error("degree l={0} is outside the supported range 2..=12")]
    InvalidDegree(u32),

    #[error("neighbors have not been computed, call find_neighbors first")]
    NeighborsNotComputed,

    /// A value was requested before the matching calculation ran.
    #[error("{what} has not been calculated")]
    NotCalculated { what: String },

    /// Two atoms (or an atom and a periodic image) share a position.
    #[error("atoms {i} and {j} are at the same position")]
    CoincidentAtoms { i: usize, j: usize },

    #[error("atom index {index} out of range for {len} atoms")]
    AtomIndex { index: usize, len: usize },

    /// The Voronoi cell of an atom could not be closed within the search cap.
    #[error("Voronoi cell of atom {index} is unbounded (search radius reached {radius})")]
    VoronoiUnbounded { index: usize, radius: f64 },

    #[error("invalid lattice: {0}")]
    InvalidLattice(String),

    #[error("parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn parse(line: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            line,
            message: message.into(),
        }
    }
}
