pub mod action;
pub mod config;
pub mod error;
pub mod flatten;
pub mod io;
pub mod model;
pub mod resource;
pub mod style;
pub mod sync;
pub mod text;
pub mod translate;

pub use error::{ProcessorError, Result};
