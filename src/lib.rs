//! Image reference resolution for the Apolo platform.
//!
//! Turns user supplied strings into [`LocalImage`] or [`RemoteImage`] values,
//! converts between the two and renders them back to canonical URIs.

pub mod config;
pub mod error;
pub mod image;
pub mod log;
pub mod parser;
pub mod reference;
pub mod registry;
pub mod repo_info;
pub mod validate;

pub use error::{ImageError, ParseError};
pub use image::{ImageOrigin, LocalImage, Org, PlatformLocation, RemoteImage, TagOption};
pub use parser::{Hierarchy, ImageNameParser, ParserOptions, ResolutionContext};
