// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! modlink CLI - load a module graph described by a JSON manifest
//!
//! Imports the entry module (or requires it with `--require`) and prints its
//! namespace as JSON.

mod manifest;

use clap::Parser;
use manifest::{Manifest, ManifestModules};
use modlink_loader::{LoadEvent, LoaderError, ModuleLoader, VERSION};
use owo_colors::OwoColorize;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{debug, info};

#[derive(Parser)]
#[command(
    name = "modlink",
    about = "Load a module dependency graph and print the entry namespace",
    version = VERSION,
    author = "Pegasus Heavy Industries"
)]
struct Cli {
    /// Manifest describing the module graph
    manifest: PathBuf,

    /// Entry module, overriding the manifest's `entry`
    entry: Option<String>,

    /// Load synchronously; fails if any module completes asynchronously
    #[arg(long)]
    require: bool,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("modlink=debug,modlink_loader=debug")
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter("modlink=warn,modlink_loader=warn")
            .init();
    }

    let manifest = match Manifest::load(&cli.manifest).await {
        Ok(manifest) => manifest,
        Err(e) => {
            eprintln!("{}: {:#}", "Error".red().bold(), e);
            return ExitCode::FAILURE;
        }
    };
    let entry = cli.entry.unwrap_or_else(|| manifest.entry().to_string());
    let modules = ManifestModules::new(manifest);
    let loader = ModuleLoader::builder()
        .resolver(modules.clone())
        .instantiator(modules.clone())
        .on_load(|event: &LoadEvent<'_>| {
            debug!(
                id = %event.id,
                dependencies = event.dependencies.len(),
                failed = event.error.is_some(),
                "load finished"
            );
        })
        .build();

    info!(entry = %entry, require = cli.require, "loading");
    let result = if cli.require {
        modules.register_all(&loader);
        loader.require(&entry)
    } else {
        loader.import(&entry).await
    };

    match result {
        Ok(ns) => match serde_json::to_string_pretty(&ns.to_json()) {
            Ok(json) => {
                println!("{json}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("{}: {}", "Error".red().bold(), e);
                ExitCode::FAILURE
            }
        },
        Err(e) => {
            report(&e);
            ExitCode::FAILURE
        }
    }
}

fn report(err: &LoaderError) {
    eprintln!("{} [{}]: {}", "Error".red().bold(), err.code().yellow(), err);
    let cause = err.root_cause();
    if !std::ptr::eq(cause, err) {
        eprintln!(
            "  {} [{}]: {}",
            "caused by".dimmed(),
            cause.code().yellow(),
            cause
        );
    }
}
