//! Configuration types for the places images are served from.
//!
//! A [`SourceConfig`] describes one origin: either a local directory tree that is mirrored into
//! a cache directory, or remote HTTP origins whose responses are stored according to a
//! [`CacheLayout`].

#![warn(missing_docs)]

mod layout;
mod sources;

pub use layout::*;
pub use sources::*;
