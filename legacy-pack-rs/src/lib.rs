#![doc = include_str!("../README.md")]

pub mod adapter;
pub mod artifact;
pub mod bundler;
pub mod config;
pub mod ecma;
pub mod error;
pub mod inject;
pub mod minify;
pub mod pipeline;
pub mod process;
pub mod sourcemap;
pub mod transpile;
pub mod workspace;

#[macro_use]
extern crate lazy_static;

pub use config::BuildConfig;
pub use error::{BuildError, BuildResult, Stage, StageFailure};
pub use inject::{InjectError, Placeholder, PlaceholderForm, WorkletInjector};
pub use pipeline::{BuildReport, Pipeline, Variant};
