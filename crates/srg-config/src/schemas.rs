// crates/srg-config/src/schemas.rs
// ============================================================================
// Module: Contract Schema Loader
// Description: Compiles the four versioned JSON Schemas the gateway
//              validates events against.
// Purpose: Fail startup loudly when a contract is missing or malformed,
//          rather than discovering it on the first validation call.
// Dependencies: jsonschema, serde_json
// ============================================================================

//! ## Overview
//! [`ContractSchemas::load`] reads `policy-decision`, `audit-event`,
//! `citations-extension`, and `evidence-bundle` from a contracts directory
//! (`docs/contracts/v1` by default) and compiles each with
//! [`jsonschema`]. A missing or invalid file is a startup error.

use std::path::Path;
use std::path::PathBuf;

use jsonschema::Draft;
use jsonschema::Validator;

/// Schema compilation or loading failure.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    /// The schema file could not be read.
    #[error("failed to read schema {name} at {path}: {source}")]
    Io { name: &'static str, path: PathBuf, source: std::io::Error },
    /// The schema file was not valid JSON.
    #[error("schema {name} at {path} is not valid JSON: {source}")]
    Malformed { name: &'static str, path: PathBuf, source: serde_json::Error },
    /// The schema document itself does not compile as a JSON Schema.
    #[error("schema {name} at {path} failed to compile: {source}")]
    Invalid { name: &'static str, path: PathBuf, source: jsonschema::ValidationError<'static> },
}

/// The four contract schemas required at startup (spec §6 "Schemas").
pub struct ContractSchemas {
    /// Validates a policy engine's decision response.
    pub policy_decision: Validator,
    /// Validates one NDJSON audit log line.
    pub audit_event: Validator,
    /// Validates the `citations` extension on a chat completion response.
    pub citations_extension: Validator,
    /// Validates an exported evidence bundle.
    pub evidence_bundle: Validator,
}

fn load_one(dir: &Path, file_stem: &'static str) -> Result<Validator, SchemaError> {
    let path = dir.join(format!("{file_stem}.schema.json"));
    let contents = std::fs::read_to_string(&path).map_err(|source| SchemaError::Io { name: file_stem, path: path.clone(), source })?;
    let document: serde_json::Value =
        serde_json::from_str(&contents).map_err(|source| SchemaError::Malformed { name: file_stem, path: path.clone(), source })?;
    jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&document)
        .map_err(|source| SchemaError::Invalid { name: file_stem, path, source: source.to_owned() })
}

impl ContractSchemas {
    /// Compiles all four contract schemas from `contracts_dir`.
    ///
    /// # Errors
    /// Returns the first [`SchemaError`] encountered; startup should treat
    /// any error here as fatal.
    pub fn load(contracts_dir: &Path) -> Result<Self, SchemaError> {
        Ok(Self {
            policy_decision: load_one(contracts_dir, "policy-decision")?,
            audit_event: load_one(contracts_dir, "audit-event")?,
            citations_extension: load_one(contracts_dir, "citations-extension")?,
            evidence_bundle: load_one(contracts_dir, "evidence-bundle")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::ContractSchemas;
    use std::path::Path;

    fn shipped_contracts_dir() -> &'static Path {
        Path::new(concat!(env!("CARGO_MANIFEST_DIR"), "/contracts/v1"))
    }

    #[test]
    fn loads_all_four_shipped_schemas() {
        let schemas = ContractSchemas::load(shipped_contracts_dir()).expect("shipped contracts compile");
        let policy_fixture = serde_json::json!({
            "decision_id": "fixture-1",
            "allow": true,
            "policy_hash": "abc",
            "evaluated_at": "2026-02-17T00:00:00Z",
            "transforms": [],
        });
        assert!(schemas.policy_decision.is_valid(&policy_fixture));
    }

    #[test]
    fn missing_contracts_dir_is_a_load_error() {
        let result = ContractSchemas::load(Path::new("/nonexistent/contracts/v1"));
        assert!(result.is_err());
    }
}
