use anyhow::{Context, Result, bail};
use schemars::{Schema, schema_for};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::debug;

use super::blocks::Macro;
use super::validate::{StructuralError, validate};

/// Load a macro from a JSON string and check its structural invariants.
pub fn load_from_str(s: &str) -> Result<Macro> {
    let mac: Macro = serde_json::from_str(s).context("Failed to parse JSON macro")?;
    check(&mac)?;
    Ok(mac)
}

/// Load a macro from any reader (e.g., a file).
pub fn load_from_reader<R: Read>(reader: R) -> Result<Macro> {
    let mac: Macro = serde_json::from_reader(reader).context("Failed to parse JSON macro")?;
    check(&mac)?;
    Ok(mac)
}

/// Load a macro from a file path synchronously.
pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Macro> {
    let path_ref = path.as_ref();
    let file = File::open(path_ref)
        .with_context(|| format!("Failed to open macro file {}", path_ref.display()))?;
    let mac = load_from_reader(file)?;
    debug!("Loaded macro from {}", path_ref.display());
    Ok(mac)
}

/// Load a macro from a file path asynchronously (Tokio).
pub async fn load_from_path_async<P: AsRef<Path>>(path: P) -> Result<Macro> {
    use tokio::fs;
    let path_ref = path.as_ref();
    let bytes = fs::read(path_ref)
        .await
        .with_context(|| format!("Failed to read macro file {}", path_ref.display()))?;
    let mac: Macro = serde_json::from_slice(&bytes)
        .with_context(|| format!("Failed to parse JSON macro from {}", path_ref.display()))?;
    check(&mac)?;
    debug!("Loaded macro from {}", path_ref.display());
    Ok(mac)
}

/// Generate the JSON Schema for the Macro model (for editors or tooling).
pub fn generate_schema() -> Schema {
    schema_for!(Macro)
}

fn check(mac: &Macro) -> Result<()> {
    let errors = validate(mac);
    if !errors.is_empty() {
        bail!("Macro failed validation:\n{}", render_errors(&errors));
    }
    Ok(())
}

/// One finding per line, for error messages and CLI output.
pub fn render_errors(errors: &[StructuralError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {e}"))
        .collect::<Vec<_>>()
        .join("\n")
}
