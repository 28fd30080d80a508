// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! CLI tool: export a JSON building model to an IFC entity graph.
//!
//! Usage:
//!   ifc-export <model.json> [options]

use std::env;
use std::fs;

use anyhow::{bail, Context};
use ifc_lite_export::{BoundingBoxBuilder, ExportConfig, Exporter, InMemoryModel, TargetDocument};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            env::var("RUST_LOG").unwrap_or_else(|_| "info,ifc_lite_export=debug".into()),
        )
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 || args[1] == "--help" || args[1] == "-h" {
        print_usage();
        return Ok(());
    }

    let model_path = &args[1];
    let mut config_path: Option<String> = None;
    let mut output_path = String::from("model.ifc.json");

    let mut i = 2;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                i += 1;
                config_path = Some(args.get(i).context("--config needs a path")?.clone());
            }
            "--output" => {
                i += 1;
                output_path = args.get(i).context("--output needs a path")?.clone();
            }
            other => {
                print_usage();
                bail!("unknown option: {other}");
            }
        }
        i += 1;
    }

    let config = match &config_path {
        Some(path) => {
            let json = fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
            ExportConfig::from_json(&json).with_context(|| format!("parsing {path}"))?
        }
        None => ExportConfig::from_env(),
    };

    let json = fs::read_to_string(model_path).with_context(|| format!("reading {model_path}"))?;
    let model = InMemoryModel::from_json(&json).with_context(|| format!("parsing {model_path}"))?;

    tracing::info!(
        model = %model_path,
        output = %output_path,
        group_mode = ?config.group_mode,
        "Starting export"
    );

    let exporter = Exporter::new(config);
    let mut doc = TargetDocument::new();
    let report = exporter
        .export_model(&model, &mut doc, &BoundingBoxBuilder)
        .context("export failed")?;

    for warning in &report.warnings {
        tracing::warn!(
            element = %warning.element,
            unique_id = %warning.unique_id,
            "{}",
            warning.message
        );
    }

    fs::write(&output_path, doc.to_json()?).with_context(|| format!("writing {output_path}"))?;

    tracing::info!(
        status = ?report.status,
        entities = doc.len(),
        exported = report.stats.exported,
        failed = report.stats.failed,
        copies = report.stats.duplicated_containers,
        relationships = report.stats.relationships,
        "Export written"
    );
    println!("{}", serde_json::to_string_pretty(&report.summary())?);
    Ok(())
}

fn print_usage() {
    println!(
        r#"IFC export
==========

Exports a JSON building model to an IFC entity graph (JSON).

USAGE:
  ifc-export <model.json> [OPTIONS]

OPTIONS:
  --config <path>    Export configuration (JSON). Defaults to IFC_EXPORT_* variables.
  --output <path>    Output file (default: model.ifc.json)
  -h, --help         Show this help message

ENVIRONMENT:
  RUST_LOG                         Log filter (default: info,ifc_lite_export=debug)
  IFC_EXPORT_EXCLUDED_CATEGORIES   Comma-separated categories to skip
  IFC_EXPORT_HIDDEN                Export hidden elements (true/false)
  IFC_EXPORT_GROUP_MODE            collection or aggregate"#
    );
}
