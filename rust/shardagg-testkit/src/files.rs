//! Shard files on disk.

use std::{io::Write, path::PathBuf};

/// Writes every shard as one ndjson file `shard_<i>.ndjson` under `dir`.
pub fn write_ndjson_shards(
    dir: &tempfile::TempDir,
    shards: &[Vec<serde_json::Value>],
) -> anyhow::Result<Vec<PathBuf>> {
    shards
        .iter()
        .enumerate()
        .map(|(i, docs)| -> anyhow::Result<PathBuf> {
            let path = dir.path().join(format!("shard_{i}.ndjson"));
            let mut file = std::io::BufWriter::new(std::fs::File::create(&path)?);
            for doc in docs {
                serde_json::to_writer(&mut file, doc)?;
                file.write_all(b"\n")?;
            }
            file.flush()?;
            Ok(path)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_shards() {
        let dir = tempfile::tempdir().unwrap();
        let shards = vec![
            vec![serde_json::json!({ "a": 1 }), serde_json::json!({ "b": 2 })],
            vec![],
        ];
        let paths = write_ndjson_shards(&dir, &shards).unwrap();
        assert_eq!(paths.len(), 2);
        let first = std::fs::read_to_string(&paths[0]).unwrap();
        assert_eq!(first.lines().count(), 2);
        assert!(std::fs::read_to_string(&paths[1]).unwrap().is_empty());
    }
}
