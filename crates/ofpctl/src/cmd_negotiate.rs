use anyhow::{Context, Result};
use ofp_session::HandshakeManager;
use ofp_wire::{version, Hello, Message, OfpMessage};
use serde::Serialize;

use crate::common;

#[derive(Debug, Clone)]
pub struct NegotiateArgs {
    /// Versions the controller supports.
    pub local: String,
    pub no_bitmap: bool,
    /// Header version of the switch HELLO.
    pub remote: String,
    /// Versions listed in the switch HELLO bitmap, if any.
    pub remote_bitmap: Option<String>,
}

#[derive(Debug, Serialize)]
struct Outcome {
    local_header: String,
    local_bitmap: Option<Vec<String>>,
    remote_header: String,
    remote_bitmap: Option<Vec<String>>,
    agreed: Option<String>,
    error: Option<String>,
}

fn names(versions: &[u8]) -> Vec<String> {
    versions.iter().copied().map(version::name).collect()
}

fn bitmap_names(message: &OfpMessage) -> Option<Vec<String>> {
    match &message.body {
        Message::Hello(hello) => hello.bitmap().map(|bitmap| names(&bitmap.versions())),
        _ => None,
    }
}

/// Run the HELLO negotiation offline for a given pair of HELLOs.
pub fn run(args: NegotiateArgs, json: bool) -> Result<()> {
    let supported = common::parse_versions(&args.local).context("parse --local")?;
    let remote_version = common::parse_version(&args.remote).context("parse --remote")?;
    let remote_hello = match &args.remote_bitmap {
        Some(list) => {
            Hello::with_versions(&common::parse_versions(list).context("parse --remote-bitmap")?)
        }
        None => Hello::default(),
    };
    let remote = OfpMessage::new(remote_version, 0, Message::Hello(remote_hello));
    let manager = HandshakeManager::new(supported, !args.no_bitmap, 0);
    let local = manager.local_hello();

    let result = manager.shake(&remote);
    let outcome = Outcome {
        local_header: version::name(local.version),
        local_bitmap: bitmap_names(local),
        remote_header: version::name(remote.version),
        remote_bitmap: bitmap_names(&remote),
        agreed: result.as_ref().ok().copied().flatten().map(version::name),
        error: result.as_ref().err().map(ToString::to_string),
    };

    if json {
        return common::print_json(&outcome);
    }
    println!(
        "local  HELLO: header {} bitmap {}",
        outcome.local_header,
        outcome
            .local_bitmap
            .as_ref()
            .map(|v| v.join(","))
            .unwrap_or_else(|| "-".into())
    );
    println!(
        "remote HELLO: header {} bitmap {}",
        outcome.remote_header,
        outcome
            .remote_bitmap
            .as_ref()
            .map(|v| v.join(","))
            .unwrap_or_else(|| "-".into())
    );
    match (&outcome.agreed, &outcome.error) {
        (Some(agreed), _) => println!("agreed: OpenFlow {agreed}"),
        (None, Some(err)) => println!("failed: {err}"),
        (None, None) => println!("failed: no version agreed"),
    }
    Ok(())
}
