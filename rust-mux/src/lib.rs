//! rust-mux library crate.
//!
//! Muxes a remote video, an `.ass` subtitle and a font into MKV by
//! supervising ffmpeg, behind a small HTTP API.

pub mod api;
pub mod clock;
pub mod config;
pub mod domain;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod registry;
pub mod service;
pub mod storage;
pub mod utils;

pub use error::{Error, Result};
