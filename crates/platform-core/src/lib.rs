//! rdtile platform core contracts.
//!
//! This crate contains the geometry and window collaborator contracts the
//! recording core consumes, without coupling to a concrete OS backend.
//! Window enumeration, placement and bitmap capture live in the host
//! application; the recorder only sees the traits declared here.

pub mod geometry;
pub mod window;

pub use geometry::*;
pub use window::*;
