use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, Context, Result};
use k256::ecdsa::SigningKey;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

use session_account::SmartAccount;

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("failed parsing JSON in {}", path.display()))
}

pub fn load_account(path: &Path) -> Result<SmartAccount> {
    read_json(path).with_context(|| {
        format!(
            "no usable account state at {} (run `account-cli deploy` first)",
            path.display()
        )
    })
}

pub fn save_account(path: &Path, account: &SmartAccount) -> Result<()> {
    write_json_atomic(path, account)
}

pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    if !parent.as_os_str().is_empty() && !parent.exists() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed creating directory {}", parent.display()))?;
    }

    let serialised = serde_json::to_string_pretty(value)
        .with_context(|| format!("failed serialising {}", path.display()))?;
    let tmp_path = tmp_path_for(path);
    fs::write(&tmp_path, serialised.as_bytes())
        .with_context(|| format!("failed writing temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("failed replacing {}", path.display()))?;
    Ok(())
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_os_string();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

pub fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "unknown".to_string())
}

pub fn now_unix() -> u64 {
    u64::try_from(OffsetDateTime::now_utc().unix_timestamp()).unwrap_or_default()
}

/// Merge component addresses into a deployments JSON, keeping unrelated keys.
pub fn record_deployments(path: &Path, network: &str, entries: &[(&str, Value)]) -> Result<()> {
    let existing = if path.exists() {
        fs::read_to_string(path).with_context(|| format!("failed reading {}", path.display()))?
    } else {
        String::new()
    };

    let mut root: Value = if existing.trim().is_empty() {
        json!({})
    } else {
        serde_json::from_str(&existing)
            .with_context(|| format!("failed parsing JSON in {}", path.display()))?
    };
    if !root.is_object() {
        root = json!({});
    }

    root["network"] = json!(network);
    root["updated_at"] = json!(now_rfc3339());
    if root.get("deployments").and_then(Value::as_object).is_none() {
        root["deployments"] = json!({});
    }
    for (key, entry) in entries {
        root["deployments"][*key] = entry.clone();
    }

    write_json_atomic(path, &root)
}

/// Load a secp256k1 key from a file or an inline hex string.
pub fn load_signing_key(path: Option<&Path>, inline: Option<&str>) -> Result<SigningKey> {
    let raw = match (path, inline) {
        (Some(path), _) => fs::read_to_string(path)
            .with_context(|| format!("failed reading key file {}", path.display()))?,
        (None, Some(key)) => key.to_string(),
        (None, None) => {
            return Err(anyhow!(
                "missing signing key: provide --private-key-path or --private-key (or set PRIV_KEY_PATH/PKEY)"
            ))
        }
    };
    let trimmed = raw.trim();
    let hex_str = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    let bytes = hex::decode(hex_str).context("private key is not valid hex")?;
    SigningKey::from_slice(&bytes).map_err(|err| anyhow!("invalid private key: {err}"))
}
