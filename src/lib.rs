//! Conversion library for AAC communication boards.
//!
//! Every vendor format is read into and written from one canonical tree
//! ([`aac::processors::model`]). Format adapters live under
//! [`aac::processors::io`], media lookup in [`aac::processors::resource`],
//! style resolution in [`aac::processors::style`], action vocabularies in
//! [`aac::processors::action`], and translation in
//! [`aac::processors::translate`]. [`aac::processors::sync`] converts between
//! any two formats.

pub mod aac;

pub use aac::processors::{
    ProcessorError, Result, action, config, error, flatten, io, model, resource, style, sync,
    text, translate,
};
