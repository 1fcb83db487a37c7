//! # Container image build tool
//!
//! This crate implements the core of ctrbuild, a client/daemon pair that
//! builds, names, and exports container images. The `ctrbuild` binary
//! (`crates/cli`) is a thin wrapper that delegates to
//! [`cli::run_from_iter`].
//!
//! The API is internal and not stable for external consumption.
//!
//! # Module Index
//!
//! - [`cli`] - Command-line interface (clap-based)
//! - [`reference`] - Image reference grammar and validation
//! - [`transport`] - Transports and reference classification
//! - [`registries`] - Registry configuration and bare-name resolution
//! - [`image`] - Locating images in the content store
//! - [`save`] - Save pipeline: validation, export, separated save
//! - [`store`] - Content store boundary
//! - [`config`] - Daemon configuration and well-known paths

pub mod cli;
pub mod config;
pub mod image;
pub mod reference;
pub mod registries;
pub mod save;
pub mod store;
pub mod transport;
