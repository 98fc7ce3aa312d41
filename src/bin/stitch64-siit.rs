use std::path::PathBuf;

use clap::Parser;
use ipnet::{Ipv4Net, Ipv6Net};

use stitch64::daemon;
use stitch64::logging::enable_logger;
use stitch64::{Flavor, Instance};

#[derive(Parser)]
#[clap(author, version, about = "Stateless SIIT translator", long_about = None)]
struct Args {
    /// RFC 6052 IPv6 translation prefix (omit to translate through
    /// explicit mappings only)
    #[clap(long, value_parser = parse_rfc6052_prefix)]
    pool6: Option<Ipv6Net>,

    /// IPv4 prefixes this translator answers for
    #[clap(long = "pool4", required = true)]
    pool4: Vec<Ipv4Net>,

    /// Explicit address mappings, as PREFIX6=PREFIX4 pairs
    #[clap(long = "eam", value_parser = parse_eam_pair)]
    eam: Vec<(Ipv6Net, Ipv4Net)>,

    /// IPv4 prefixes excluded from translation
    #[clap(long = "blacklist")]
    blacklist: Vec<Ipv4Net>,

    /// IPv4 prefixes to source untranslatable ICMP errors from
    #[clap(long = "rfc6791")]
    rfc6791: Vec<Ipv4Net>,

    /// Explicitly set the interface name to use
    #[clap(short, long, default_value_t = ("siit%d").to_string())]
    interface: String,

    /// Where the control socket listens
    #[clap(long, default_value = "/run/stitch64-siit.sock")]
    control_socket: PathBuf,

    /// Enable verbose logging
    #[clap(short, long)]
    verbose: bool,
}

fn parse_rfc6052_prefix(value: &str) -> Result<Ipv6Net, String> {
    let prefix: Ipv6Net = value.parse().map_err(|err| format!("{err}"))?;
    if !prefix_pool::LEGAL_PREFIX_LENS.contains(&prefix.prefix_len()) {
        return Err(format!(
            "prefix length must be one of {:?}",
            prefix_pool::LEGAL_PREFIX_LENS
        ));
    }
    Ok(prefix)
}

fn parse_eam_pair(value: &str) -> Result<(Ipv6Net, Ipv4Net), String> {
    let (left, right) = value
        .split_once('=')
        .ok_or_else(|| "expected PREFIX6=PREFIX4".to_string())?;
    Ok((
        left.parse().map_err(|err| format!("{err}"))?,
        right.parse().map_err(|err| format!("{err}"))?,
    ))
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    enable_logger(args.verbose);
    daemon::require_root();

    let instance = Instance::new(Flavor::Siit);
    if let Some(pool6) = args.pool6 {
        if let Err(err) = instance.pool6.write().add(pool6) {
            log::error!("Bad pool6 prefix: {err}");
            std::process::exit(1);
        }
    }
    {
        let state = instance.siit().unwrap();
        for prefix in &args.pool4 {
            if let Err(err) = state.pool4.write().add(*prefix) {
                log::error!("Bad pool4 prefix {prefix}: {err}");
                std::process::exit(1);
            }
        }
        for (prefix6, prefix4) in &args.eam {
            if let Err(err) = state.eamt.write().add(*prefix6, *prefix4) {
                log::error!("Bad mapping {prefix6}={prefix4}: {err}");
                std::process::exit(1);
            }
        }
        for prefix in &args.blacklist {
            if let Err(err) = state.blacklist.write().add(*prefix) {
                log::error!("Bad blacklist prefix {prefix}: {err}");
                std::process::exit(1);
            }
        }
        for prefix in &args.rfc6791 {
            if let Err(err) = state.rfc6791.write().add(*prefix) {
                log::error!("Bad RFC 6791 prefix {prefix}: {err}");
                std::process::exit(1);
            }
        }
    }

    if args.pool6.is_none() && args.eam.is_empty() {
        log::warn!("No pool6 prefix and no mappings; nothing will translate");
    }

    if let Err(err) = daemon::run(instance, &args.interface, args.control_socket).await {
        log::error!("Fatal: {err}");
        std::process::exit(1);
    }
}
