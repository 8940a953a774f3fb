//! Local structure analysis of atomic configurations: Voronoi and cutoff
//! neighbors, Steinhardt bond-orientational order parameters and solid
//! identification.

pub mod atom;
pub mod cell;
pub mod config;
pub mod error;
pub mod harmonics;
pub mod io;
pub mod lattice;
pub mod neighbors;
pub mod order;
pub mod search;
pub mod system;
pub mod voronoi;

#[cfg(feature = "python")]
mod python_api;

#[cfg(feature = "dhat-heap")]
#[global_allocator]
static ALLOC: dhat::Alloc = dhat::Alloc;

pub use atom::Atom;
pub use cell::{Cell, CellError};
pub use error::{Error, Result};
pub use lattice::{Structure, make_crystal};
pub use neighbors::{Neighbor, NeighborMethod};
pub use system::{SolidOptions, System};
pub use voronoi::VoronoiCell;

use tracing_subscriber::EnvFilter;

/// Installs a global `tracing` subscriber.
///
/// `RUST_LOG` takes precedence over `level`, which defaults to `info`.
/// Calling it again after a subscriber is installed has no effect.
pub fn init_logging(level: Option<&str>) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.unwrap_or("info")));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_span_events(tracing_subscriber::fmt::format::FmtSpan::CLOSE)
        .with_thread_ids(true)
        .try_init();
}
