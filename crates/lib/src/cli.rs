//! Command-line interface for ctrbuild.
//!
//! This layer only maps flags onto option structs and renders results;
//! validation and execution live in [`crate::save`].

use std::ffi::OsString;
use std::io::Write;

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use clap::{Parser, Subcommand};
use fn_error_context::context;
use tokio_util::sync::CancellationToken;

use crate::config::{self, DaemonConfig};
use crate::registries::RegistryConfig;
use crate::save::{SaveOptions, SeparatorOption, run_save};
use crate::store::{FsStore, SHORT_ID_LEN};

/// Top-level options.
#[derive(Debug, Parser)]
#[clap(name = "ctrbuild", about = "Build, name and export container images", version)]
pub struct Cli {
    /// The log level (e.g. trace, debug, info, warn, error)
    #[clap(long, global = true, default_value = "warn")]
    pub log_level: String,

    /// Override the image store root
    #[clap(long, global = true)]
    pub data_root: Option<Utf8PathBuf>,

    #[clap(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Save one or more images to a local archive
    Save(SaveOpts),
    /// List images in the local store
    Images(ImagesOpts),
}

/// Options of `ctrbuild save`.
#[derive(Debug, clap::Args)]
pub struct SaveOpts {
    /// Images to save
    pub images: Vec<String>,

    /// Output archive path
    #[clap(short = 'o', long = "output")]
    pub output: Option<Utf8PathBuf>,

    /// Image format written to the archive
    #[clap(short = 'f', long = "format", default_value = "docker")]
    pub format: String,

    /// Separated save: name of the base image
    #[clap(short = 'b', long = "base")]
    pub base: Option<String>,

    /// Separated save: name of the library image
    #[clap(short = 'l', long = "lib")]
    pub lib: Option<String>,

    /// Separated save: name of the rename mapping file
    #[clap(short = 'r', long = "rename")]
    pub rename: Option<String>,

    /// Separated save: destination directory
    #[clap(short = 'd', long = "dest")]
    pub dest: Option<Utf8PathBuf>,
}

impl SaveOpts {
    fn to_options(&self) -> SaveOptions {
        let separated = self.base.is_some()
            || self.lib.is_some()
            || self.rename.is_some()
            || self.dest.is_some();
        SaveOptions {
            images: self.images.clone(),
            path: self.output.clone().unwrap_or_default(),
            format: self.format.clone(),
            separator: separated.then(|| SeparatorOption {
                base_image: self.base.clone().unwrap_or_default(),
                lib_image: self.lib.clone().unwrap_or_default(),
                rename_file: self.rename.clone().unwrap_or_default(),
                dest_path: self.dest.clone().unwrap_or_default(),
            }),
        }
    }
}

/// Options of `ctrbuild images`.
#[derive(Debug, clap::Args)]
pub struct ImagesOpts {
    /// Output as JSON
    #[clap(long)]
    pub json: bool,
}

fn open_store(cli: &Cli) -> Result<FsStore> {
    let data_root = match &cli.data_root {
        Some(root) => root.clone(),
        None => DaemonConfig::load(Utf8Path::new(config::CONFIGURATION_PATH))?.data_root,
    };
    FsStore::open(data_root.clone()).with_context(|| format!("Opening image store at {data_root}"))
}

#[context("Loading registry configuration")]
fn load_registries() -> Result<RegistryConfig> {
    RegistryConfig::load(Utf8Path::new(config::REGISTRY_CONFIG_PATH))
}

#[context("Saving images")]
fn save(cli: &Cli, opts: &SaveOpts) -> Result<()> {
    let options = opts.to_options();
    // Validate before touching the store, so option errors surface even
    // when no store is set up.
    options.check()?;
    let store = open_store(cli)?;
    let registries = load_registries()?;
    run_save(&store, &registries, &options, &CancellationToken::new())?;
    Ok(())
}

#[context("Listing images")]
fn images(cli: &Cli, opts: &ImagesOpts) -> Result<()> {
    let store = open_store(cli)?;
    let images = store.list()?;
    let mut stdout = std::io::stdout().lock();
    if opts.json {
        serde_json::to_writer_pretty(&mut stdout, &images)?;
        writeln!(stdout)?;
        return Ok(());
    }
    writeln!(stdout, "{:<56} IMAGE ID", "REPOSITORY")?;
    for image in images {
        let id = &image.id[..image.id.len().min(SHORT_ID_LEN)];
        if image.names.is_empty() {
            writeln!(stdout, "{:<56} {id}", "<none>")?;
        }
        for name in &image.names {
            writeln!(stdout, "{name:<56} {id}")?;
        }
    }
    Ok(())
}

/// Parse the given arguments and execute the requested command.
pub fn run_from_iter<I>(args: I) -> Result<()>
where
    I: IntoIterator,
    I::Item: Into<OsString> + Clone,
{
    let cli = Cli::parse_from(args);
    ctrbuild_utils::initialize_tracing(&cli.log_level);
    match &cli.command {
        Command::Save(opts) => save(&cli, opts),
        Command::Images(opts) => images(&cli, opts),
    }
}
