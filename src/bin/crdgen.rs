// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! CRD YAML Generator
//!
//! Writes the `TunnelConfig` CustomResourceDefinition derived from src/crd.rs
//! to deploy/crds/, so the manifests never drift from the Rust types.
//!
//! Usage:
//!   cargo run --bin crdgen

use kube::CustomResourceExt;
use std::fs;
use std::path::Path;
use tunnelgate::crd::TunnelConfig;

const COPYRIGHT_HEADER: &str = "# Copyright (c) 2025 Erick Bourgeois, firestoned
# SPDX-License-Identifier: MIT
#
# This file is AUTO-GENERATED from src/crd.rs
# DO NOT EDIT MANUALLY - Run `cargo run --bin crdgen` to regenerate
#
";

fn main() -> anyhow::Result<()> {
    let output_dir = Path::new("deploy/crds");
    fs::create_dir_all(output_dir)?;

    println!("Generating CRD YAML files from src/crd.rs...");
    generate_crd::<TunnelConfig>("tunnelconfigs.crd.yaml", output_dir)?;
    println!("Next step: kubectl apply -f deploy/crds/");

    Ok(())
}

fn generate_crd<T>(filename: &str, output_dir: &Path) -> anyhow::Result<()>
where
    T: CustomResourceExt,
{
    let yaml = serde_yaml::to_string(&T::crd())?;
    let output_path = output_dir.join(filename);
    fs::write(&output_path, format!("{COPYRIGHT_HEADER}{yaml}"))?;

    println!("  Generated {}", output_path.display());
    Ok(())
}
