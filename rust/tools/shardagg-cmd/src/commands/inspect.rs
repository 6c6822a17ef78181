//! Inspect command implementation

use anyhow::{Context, Result};
use shardagg::{
    codec,
    render::{self, RenderOptions},
};

use crate::utils::{print_json, validate_file_exists};

pub fn run(path: &str, skip_empty: bool) -> Result<()> {
    print_json(&inspect(path, skip_empty)?)
}

fn inspect(path: &str, skip_empty: bool) -> Result<serde_json::Value> {
    validate_file_exists(path)?;
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {path}"))?;
    let aggregations =
        codec::decode_aggregations(&bytes).with_context(|| format!("Failed to decode {path}"))?;
    Ok(render::to_json_with(
        &aggregations,
        &RenderOptions {
            skip_empty_buckets: skip_empty,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inspect_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.bin");
        std::fs::write(&path, b"not a payload").unwrap();
        let err = inspect(path.to_str().unwrap(), false).unwrap_err();
        assert!(format!("{err:#}").contains("Failed to decode"));
    }

    #[test]
    fn test_inspect_missing_file() {
        assert!(inspect("/nonexistent/result.bin", false).is_err());
    }
}
