use std::path::PathBuf;

use clap::Parser;
use ipnet::{Ipv4Net, Ipv6Net};

use stitch64::daemon;
use stitch64::logging::enable_logger;
use stitch64::{Flavor, Instance};

#[derive(Parser)]
#[clap(author, version, about = "Stateful NAT64 translator", long_about = None)]
struct Args {
    /// RFC 6052 IPv6 translation prefix
    #[clap(long, default_value_t = ("64:ff9b::/96").parse().unwrap(), value_parser = parse_rfc6052_prefix)]
    pool6: Ipv6Net,

    /// IPv4 prefixes to draw outbound bindings from
    #[clap(long = "pool4", required = true)]
    pool4: Vec<Ipv4Net>,

    /// Lowest port leased from each pool4 address
    #[clap(long, default_value = "1024")]
    port_min: u16,

    /// Highest port leased from each pool4 address
    #[clap(long, default_value = "65535")]
    port_max: u16,

    /// Explicitly set the interface name to use
    #[clap(short, long, default_value_t = ("nat64%d").to_string())]
    interface: String,

    /// Where the control socket listens
    #[clap(long, default_value = "/run/stitch64.sock")]
    control_socket: PathBuf,

    /// Enable verbose logging
    #[clap(short, long)]
    verbose: bool,
}

/// Reject prefixes RFC 6052 would not let us embed into.
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

#[tokio::main]
async fn main() {
    let args = Args::parse();
    enable_logger(args.verbose);
    daemon::require_root();

    if args.port_min > args.port_max {
        log::error!("--port-min must not exceed --port-max");
        std::process::exit(1);
    }

    let instance = Instance::new(Flavor::Nat64);
    if let Err(err) = instance.pool6.write().add(args.pool6) {
        log::error!("Bad pool6 prefix: {err}");
        std::process::exit(1);
    }
    {
        let state = instance.nat64().unwrap();
        let mut pool4 = state.pool4.write();
        for prefix in &args.pool4 {
            if let Err(err) = pool4.add(*prefix, args.port_min..=args.port_max) {
                log::error!("Bad pool4 prefix {prefix}: {err}");
                std::process::exit(1);
            }
        }
    }

    if let Err(err) = daemon::run(instance, &args.interface, args.control_socket).await {
        log::error!("Fatal: {err}");
        std::process::exit(1);
    }
}
