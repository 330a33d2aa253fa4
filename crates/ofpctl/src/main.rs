mod cmd_config;
mod cmd_negotiate;
mod cmd_serve;
mod common;

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Result;
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::cmd_config::ConfigOverrides;
use crate::cmd_negotiate::NegotiateArgs;
use crate::cmd_serve::ServeArgs;

#[derive(Parser, Debug)]
#[command(name = "ofpctl", version, about = "OpenFlow controller CLI")]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
    /// Output JSON where applicable
    #[arg(long)]
    json: bool,
    #[command(subcommand)]
    cmd: Cmd,
}

/// Settings shared by `serve` and `config`.
#[derive(Args, Debug)]
struct ConfigArgs {
    /// JSON config file; flags override its values
    #[arg(long)]
    config: Option<PathBuf>,
    /// Address to accept switch connections on
    #[arg(long)]
    listen: Option<SocketAddr>,
    /// Outstanding requests allowed per device
    #[arg(long)]
    quota: Option<usize>,
    #[arg(long)]
    echo_timeout_ms: Option<u64>,
    #[arg(long)]
    idle_timeout_ms: Option<u64>,
    /// Supported versions, e.g. 1.3,1.0
    #[arg(long)]
    versions: Option<String>,
    /// Do not advertise a version bitmap in HELLO
    #[arg(long)]
    no_bitmap: bool,
    /// Shortest pause between statistics rounds of a device
    #[arg(long)]
    poll_interval_ms: Option<u64>,
    /// Do not poll device statistics
    #[arg(long)]
    no_polling: bool,
}

impl From<ConfigArgs> for ConfigOverrides {
    fn from(args: ConfigArgs) -> Self {
        ConfigOverrides {
            config: args.config,
            listen: args.listen,
            quota: args.quota,
            echo_timeout_ms: args.echo_timeout_ms,
            idle_timeout_ms: args.idle_timeout_ms,
            versions: args.versions,
            no_bitmap: args.no_bitmap,
            poll_interval_ms: args.poll_interval_ms,
            no_polling: args.no_polling,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Accept switch connections and report connected devices
    Serve {
        #[command(flatten)]
        config: ConfigArgs,
        /// Seconds between reports (0 disables)
        #[arg(long, default_value_t = 10)]
        report_interval_s: u64,
    },
    /// Negotiate a version for a given switch HELLO offline
    Negotiate {
        /// Versions supported locally
        #[arg(long, default_value = "1.3,1.0")]
        local: String,
        #[arg(long)]
        no_bitmap: bool,
        /// Header version of the switch HELLO
        #[arg(long)]
        remote: String,
        /// Versions in the switch HELLO bitmap
        #[arg(long)]
        remote_bitmap: Option<String>,
    },
    /// Print the effective configuration
    Config {
        #[command(flatten)]
        config: ConfigArgs,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let Cli { verbose, json, cmd } = Cli::parse();

    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| level.into()),
        ))
        .with_target(false)
        .init();

    match cmd {
        Cmd::Serve {
            config,
            report_interval_s,
        } => {
            let args = ServeArgs {
                overrides: config.into(),
                report_interval_s,
            };
            cmd_serve::run(args, json).await?
        }
        Cmd::Negotiate {
            local,
            no_bitmap,
            remote,
            remote_bitmap,
        } => cmd_negotiate::run(
            NegotiateArgs {
                local,
                no_bitmap,
                remote,
                remote_bitmap,
            },
            json,
        )?,
        Cmd::Config { config } => cmd_config::run(&config.into())?,
    };

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_serve_defaults() {
        let cli = Cli::parse_from(["ofpctl", "serve"]);
        match cli.cmd {
            Cmd::Serve {
                config,
                report_interval_s,
            } => {
                assert_eq!(report_interval_s, 10);
                assert!(config.listen.is_none());
                assert!(!config.no_bitmap);
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn parse_serve_overrides() {
        let cli = Cli::parse_from([
            "ofpctl",
            "-vv",
            "serve",
            "--listen",
            "127.0.0.1:6633",
            "--quota",
            "64",
            "--echo-timeout-ms",
            "500",
            "--no-bitmap",
        ]);
        assert_eq!(cli.verbose, 2);
        match cli.cmd {
            Cmd::Serve { config, .. } => {
                let overrides = ConfigOverrides::from(config);
                assert_eq!(overrides.listen, Some("127.0.0.1:6633".parse().unwrap()));
                assert_eq!(overrides.quota, Some(64));
                assert_eq!(overrides.echo_timeout_ms, Some(500));
                assert!(overrides.no_bitmap);
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn parse_negotiate_args() {
        let cli = Cli::parse_from([
            "ofpctl",
            "--json",
            "negotiate",
            "--remote",
            "1.4",
            "--remote-bitmap",
            "1.0,1.3,1.4",
        ]);
        assert!(cli.json);
        match cli.cmd {
            Cmd::Negotiate {
                local,
                remote,
                remote_bitmap,
                ..
            } => {
                assert_eq!(local, "1.3,1.0");
                assert_eq!(remote, "1.4");
                assert_eq!(remote_bitmap.as_deref(), Some("1.0,1.3,1.4"));
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }
}
