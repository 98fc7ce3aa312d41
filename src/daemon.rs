//! The shared runtime of both binaries: the TUN loop, the control
//! socket, and the expiry task.

use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::Arc;

use nix::unistd::Uid;
use tokio::sync::mpsc;

use crate::instance::Instance;
use crate::pipeline;
use crate::tun::Tun;

/// Creating TUN devices and binding control sockets needs root.
pub fn require_root() {
    if !Uid::effective().is_root() {
        log::error!("This program must be run as root");
        std::process::exit(1);
    }
}

/// Bring the instance online: control socket, expiry task, packet loop.
/// Only returns on a fatal I/O error.
pub async fn run(
    instance: Arc<Instance>,
    interface: &str,
    control_socket: PathBuf,
) -> std::io::Result<()> {
    let mut tun = Tun::new(interface)?;
    log::info!("Translating packets on {}", tun.name());
    log::info!("Route your prefixes at {} to start traffic flowing", tun.name());

    // Packets generated off the packet path (ICMP errors from expired
    // holds) funnel through a dedicated writer.
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Vec<u8>>(64);
    let mut tun_writer = tun.try_clone()?;
    std::thread::spawn(move || {
        while let Some(packet) = outbound_rx.blocking_recv() {
            if let Err(err) = tun_writer.write_all(&packet) {
                log::warn!("Failed to write generated packet: {err}");
            }
        }
    });

    tokio::spawn({
        let instance = Arc::clone(&instance);
        async move {
            if let Err(err) = crate::control::server::serve(instance, &control_socket).await {
                log::error!("Control server died: {err}");
            }
        }
    });

    tokio::spawn(expiry_task(Arc::clone(&instance), outbound_tx));

    // The dataplane proper.
    let mut buffer = vec![0u8; 65536];
    loop {
        let len = tun.read(&mut buffer)?;
        let output = pipeline::process(&instance, &buffer[..len]);
        log::trace!("Verdict: {:?}", output.verdict);
        for packet in output.packets {
            if let Err(err) = tun.write_all(&packet) {
                log::warn!("Failed to write translated packet: {err}");
            }
        }
    }
}

/// Sleep until the earliest session or fragment deadline, sweep, repeat.
/// Any event that may move the deadline pokes `expiry_rearm`.
async fn expiry_task(instance: Arc<Instance>, outbound: mpsc::Sender<Vec<u8>>) {
    loop {
        match pipeline::next_deadline(&instance) {
            Some(deadline) => {
                let sleep = tokio::time::sleep_until(tokio::time::Instant::from_std(deadline));
                tokio::select! {
                    () = sleep => {}
                    () = instance.expiry_rearm.notified() => continue,
                }
            }
            None => {
                instance.expiry_rearm.notified().await;
                continue;
            }
        }
        for packet in pipeline::expire(&instance, std::time::Instant::now()) {
            if outbound.send(packet).await.is_err() {
                return;
            }
        }
    }
}
