use std::convert::TryInto;
use std::fs;
use std::path::Path;
use std::time::SystemTime;

use anyhow::{anyhow, bail, Context, Result};
use ofp_wire::version;
use openflowplugin::ControllerConfig;
use serde::Serialize;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("serialise JSON output")?;
    println!("{text}");
    Ok(())
}

pub fn format_system_time(ts: SystemTime) -> Result<String> {
    let dt: OffsetDateTime = ts
        .try_into()
        .map_err(|err| anyhow!("convert time: {err}"))?;
    dt.format(&Rfc3339).context("format timestamp")
}

/// Parse `1.3`, `4` or `0x04` into a wire version byte.
pub fn parse_version(text: &str) -> Result<u8> {
    let text = text.trim();
    let parsed = match text {
        "1.0" => version::OF10,
        "1.1" => version::OF11,
        "1.2" => version::OF12,
        "1.3" => version::OF13,
        "1.4" => version::OF14,
        "1.5" => version::OF15,
        _ => {
            let raw = match text.strip_prefix("0x") {
                Some(hex) => u8::from_str_radix(hex, 16),
                None => text.parse(),
            };
            raw.map_err(|_| anyhow!("invalid OpenFlow version '{text}'"))?
        }
    };
    if parsed == 0 || parsed > 31 {
        bail!("OpenFlow version {parsed} out of range");
    }
    Ok(parsed)
}

/// Parse a comma separated version list such as `1.3,1.0`.
pub fn parse_versions(text: &str) -> Result<Vec<u8>> {
    text.split(',')
        .filter(|part| !part.trim().is_empty())
        .map(parse_version)
        .collect()
}

/// Load a JSON controller config; missing fields keep their defaults.
pub fn load_config(path: &Path) -> Result<ControllerConfig> {
    let text = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parse {}", path.display()))
}
