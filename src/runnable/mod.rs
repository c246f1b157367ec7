// src/runnable/mod.rs

//! Declarative descriptions of units of work.
//!
//! - [`model`] holds the [`Runnable`] and [`Dependency`] value types and the
//!   command-line rendering used to invoke standalone workers.
//! - [`recipe`] implements JSON (de)serialization, including the
//!   `__encoded_set__` convention for set-valued tags.
//! - [`identifier`] applies the user-configured identifier format template.

pub mod identifier;
pub mod model;
pub mod recipe;

pub use model::{Dependency, Runnable};
