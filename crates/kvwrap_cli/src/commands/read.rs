//! Read-only commands.

use super::{display_bytes, open_database, parse_bytes};
use kvwrap_core::TraverseControl;
use serde::Serialize;
use std::path::Path;

/// One record in `dump --format json` output.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct DumpEntry {
    /// Key, rendered by [`display_bytes`].
    pub key: String,
    /// Value, rendered by [`display_bytes`].
    pub value: String,
}

/// Prints the value stored under `key`.
pub fn get(path: &Path, key: &str) -> Result<(), Box<dyn std::error::Error>> {
    let db = open_database(path, false)?;
    let key = parse_bytes(key)?;
    match db.fetch(&key)? {
        Some(value) => {
            println!("{}", display_bytes(&value));
            Ok(())
        }
        None => Err(format!("Key not found: {}", display_bytes(&key)).into()),
    }
}

/// Prints `true` or `false`.
pub fn exists(path: &Path, key: &str) -> Result<(), Box<dyn std::error::Error>> {
    let db = open_database(path, false)?;
    println!("{}", db.exists(&parse_bytes(key)?)?);
    Ok(())
}

/// Collects up to `limit` records, sorted by key.
pub fn collect_entries(
    path: &Path,
    limit: Option<usize>,
) -> Result<Vec<DumpEntry>, Box<dyn std::error::Error>> {
    let db = open_database(path, false)?;
    let mut records = Vec::new();
    db.traverse_read(|key, value| {
        records.push((key.to_vec(), value.to_vec()));
        Ok(TraverseControl::Continue)
    })?;
    records.sort();

    Ok(records
        .into_iter()
        .take(limit.unwrap_or(usize::MAX))
        .map(|(key, value)| DumpEntry {
            key: display_bytes(&key),
            value: display_bytes(&value),
        })
        .collect())
}

/// Prints every record.
pub fn dump(
    path: &Path,
    limit: Option<usize>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let entries = collect_entries(path, limit)?;
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&entries)?),
        _ => {
            for entry in &entries {
                println!("{}\t{}", entry.key, entry.value);
            }
        }
    }
    Ok(())
}

/// Prints the number of records.
pub fn count(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let db = open_database(path, false)?;
    let count = db.traverse_read(|_, _| Ok(TraverseControl::Continue))?;
    println!("{count}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kvwrap_core::StoreMode;

    #[test]
    fn entries_are_sorted_and_limited() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_database(dir.path(), true).unwrap();
        for key in [&b"c"[..], b"a", b"b", &[0xff]] {
            db.store(key, b"v", StoreMode::Insert).unwrap();
        }

        let entries = collect_entries(dir.path(), Some(3)).unwrap();
        let keys: Vec<_> = entries.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, ["a", "b", "c"]);

        let all = collect_entries(dir.path(), None).unwrap();
        assert_eq!(all.last().unwrap().key, "hex:ff");
    }

    #[test]
    fn json_shape() {
        let entry = DumpEntry {
            key: "k".into(),
            value: "v".into(),
        };
        assert_eq!(
            serde_json::to_string(&entry).unwrap(),
            r#"{"key":"k","value":"v"}"#
        );
    }
}
