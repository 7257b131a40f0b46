//! Mesh generation and query algorithms.
//!
//! The tile pipeline runs these roughly in declaration order:
//!
//! - [`select`] picks the start points: corners, constraint endpoints,
//!   edge rows and sparse wet-interior samples
//! - [`refine`] grows the mesh greedily until the error budget is met
//! - [`constrain`] burns map boundaries in and flood-fills terrain
//! - [`border`] matches a neighbor's persisted edge and rebases it
//! - [`blend`] spreads transition layers and optimizes the result
//! - [`march`] answers height queries and walks straight lines

pub mod blend;
pub mod border;
pub mod constrain;
pub mod march;
pub mod refine;
pub mod select;
