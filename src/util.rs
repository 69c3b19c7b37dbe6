use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::EvalError;

pub fn now_utc_string() -> String {
    utc_string(Utc::now())
}

pub fn utc_string(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Expands strftime tokens in `template`; callers validate the template first.
pub fn expand_folder_template(template: &str, ts: DateTime<Utc>) -> String {
    ts.format(template).to_string()
}

pub fn ensure_directory(path: &Path) -> Result<(), EvalError> {
    fs::create_dir_all(path).map_err(|err| EvalError::io(path, err))
}

pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)
        .with_context(|| format!("failed to open file for hashing: {}", path.display()))?;

    let mut hasher = Sha256::new();
    let mut buf = [0_u8; 8192];

    loop {
        let count = file
            .read(&mut buf)
            .with_context(|| format!("failed to read file for hashing: {}", path.display()))?;
        if count == 0 {
            break;
        }
        hasher.update(&buf[..count]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

pub fn write_json_pretty<T: Serialize>(path: &Path, value: &T) -> Result<(), EvalError> {
    if let Some(parent) = path.parent() {
        ensure_directory(parent)?;
    }

    let data = serde_json::to_vec_pretty(value)
        .map_err(|err| EvalError::io(path, std::io::Error::other(err)))?;

    let mut file = File::create(path).map_err(|err| EvalError::io(path, err))?;
    file.write_all(&data)
        .map_err(|err| EvalError::io(path, err))?;
    file.write_all(b"\n")
        .map_err(|err| EvalError::io(path, err))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn folder_template_expands_strftime_tokens() {
        let ts = Utc.with_ymd_and_hms(2026, 3, 7, 14, 5, 9).unwrap();
        assert_eq!(
            expand_folder_template("eval-%Y-%m-%d-%H-%M-%S", ts),
            "eval-2026-03-07-14-05-09"
        );
        assert_eq!(utc_string(ts), "2026-03-07T14:05:09Z");
    }

    #[test]
    fn sha256_is_stable_for_identical_content() {
        let dir = tempfile::tempdir().expect("tempdir");
        let first = dir.path().join("a.json");
        let second = dir.path().join("b.json");
        fs::write(&first, b"[]").expect("write");
        fs::write(&second, b"[]").expect("write");
        assert_eq!(
            sha256_file(&first).expect("hash"),
            sha256_file(&second).expect("hash")
        );
    }
}
