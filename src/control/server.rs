//! The Unix-socket transport for the control protocol: length-prefixed
//! frames, one request/response pair per frame, privileges from the
//! peer's credentials.

use std::path::Path;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};

use crate::control;
use crate::instance::Instance;

/// Refuse frames bigger than this; no legal request comes close.
const MAX_FRAME: usize = 1 << 20;

pub async fn serve(instance: Arc<Instance>, path: &Path) -> std::io::Result<()> {
    // A stale socket from a previous run would block the bind.
    let _ = std::fs::remove_file(path);
    let listener = UnixListener::bind(path)?;
    log::info!("Control socket listening at {}", path.display());

    loop {
        let (stream, _) = listener.accept().await?;
        let instance = Arc::clone(&instance);
        tokio::spawn(async move {
            if let Err(err) = serve_client(&instance, stream).await {
                log::debug!("Control connection ended: {err}");
            }
        });
    }
}

async fn serve_client(instance: &Instance, mut stream: UnixStream) -> std::io::Result<()> {
    let privileged = peer_is_root(&stream);
    loop {
        let mut len_bytes = [0u8; 4];
        match stream.read_exact(&mut len_bytes).await {
            Ok(_) => {}
            Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(err) => return Err(err),
        }
        let len = u32::from_le_bytes(len_bytes) as usize;
        if len > MAX_FRAME {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("oversized control frame: {len} bytes"),
            ));
        }
        let mut request = vec![0u8; len];
        stream.read_exact(&mut request).await?;

        let response = control::dispatch(instance, &request, privileged);
        stream
            .write_all(&(response.len() as u32).to_le_bytes())
            .await?;
        stream.write_all(&response).await?;
    }
}

/// Mutating operations require the peer process to run as root.
fn peer_is_root(stream: &UnixStream) -> bool {
    use std::os::fd::AsRawFd;
    nix::sys::socket::getsockopt(
        stream.as_raw_fd(),
        nix::sys::socket::sockopt::PeerCredentials,
    )
    .map(|creds| creds.uid() == 0)
    .unwrap_or(false)
}
