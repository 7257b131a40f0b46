//! Persistence for cross-tile continuity.
//!
//! Currently one format: the plain-text border match file each finished
//! tile writes for its neighbors ([`border_file`]).

pub mod border_file;
