//! cinelab CLI
//!
//! Inspect, export and import annotation packages.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cinelab_model::serialize::{file_url, json_path};
use cinelab_model::{ElementKind, ModelConfig, Package, PackageElement, PackageOptions, SaveOptions};

#[derive(Parser, Debug)]
#[command(name = "cinelab")]
#[command(version, about = "Inspect and convert video annotation packages", long_about = None)]
struct Cli {
    /// Model configuration file (TOML or JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Open packages with the core rules only
    #[arg(long, global = true)]
    core: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the URL, URI and element counts of a package
    Info { url: String },
    /// List the annotations of a package and its imports, in time order
    Annotations { url: String },
    /// Write a package to a JSON file
    Export {
        url: String,
        file: PathBuf,
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
    /// Copy a JSON package into an SQLite store
    Import {
        file: PathBuf,
        target: String,
        /// Replace an existing package
        #[arg(short, long)]
        force: bool,
    },
}

impl Cli {
    fn options(&self) -> Result<PackageOptions, Box<dyn std::error::Error>> {
        let config = match &self.config {
            Some(path) => ModelConfig::load(path)?,
            None => ModelConfig::default(),
        };
        let options = PackageOptions::default().with_config(config);
        Ok(if self.core { options } else { options.cam() })
    }

    fn open(&self, url: &str) -> Result<Package, Box<dyn std::error::Error>> {
        Ok(Package::open_with(url, self.options()?.readonly(true))?)
    }
}

fn info(package: &Package) -> Result<(), Box<dyn std::error::Error>> {
    println!("url: {}", package.url());
    println!("uri: {}", package.uri()?);
    let mut counts = std::collections::BTreeMap::new();
    for element in package.own().elements().iter()? {
        *counts.entry(element.kind()).or_insert(0usize) += 1;
    }
    for kind in ElementKind::ALL {
        println!("{:>10}: {}", kind.name(), counts.get(&kind).copied().unwrap_or(0));
    }
    let imports = package.imports();
    if !imports.is_empty() {
        println!("imports:");
        for (alias, imported) in imports {
            match imported {
                Some(p) => println!("  {} -> {}", alias, p.url()),
                None => println!("  {} (unresolved)", alias),
            }
        }
    }
    Ok(())
}

fn annotations(package: &Package) -> Result<(), Box<dyn std::error::Error>> {
    for annotation in package.all().annotations().iter()? {
        println!(
            "{}\t{}\t{}\t{}",
            annotation.begin(),
            annotation.end(),
            annotation.media_idref(),
            annotation.make_idref_for(package)?
        );
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match &cli.command {
        Command::Info { url } => info(&cli.open(url)?)?,
        Command::Annotations { url } => annotations(&cli.open(url)?)?,
        Command::Export { url, file, force } => {
            let package = cli.open(url)?;
            let target = file_url(&json_path(&file.to_string_lossy())?)?;
            package.save_as(
                &target,
                SaveOptions {
                    erase: *force,
                    change_url: false,
                },
            )?;
            eprintln!("exported {} to {}", package.url(), file.display());
        }
        Command::Import {
            file,
            target,
            force,
        } => {
            let source = cli.open(&file_url(&json_path(&file.to_string_lossy())?)?)?;
            source.save_as(
                target,
                SaveOptions {
                    erase: *force,
                    change_url: false,
                },
            )?;
            eprintln!("imported {} into {}", file.display(), target);
        }
    }
    Ok(())
}
