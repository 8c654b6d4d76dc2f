use crate::transport::endpoint::SocketCore;
use crate::transport::mailbox::Inbox;
use crate::transport::peer::Pipe;
use crate::transport::wire::{self, MessageAssembler};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use switchyard_core::{Address, Error, Identity, Result};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};
use tracing::{debug, trace, warn};

fn target(address: &Address) -> Result<String> {
    address.socket_target().ok_or_else(|| Error::AddressError {
        address: address.to_string(),
        reason: "not a tcp address".to_string(),
    })
}

/// Binds a listener and spawns its accept loop. Returns the bound local
/// address.
pub(crate) async fn bind(core: Arc<SocketCore>, address: &Address) -> Result<SocketAddr> {
    let listener = TcpListener::bind(target(address)?)
        .await
        .map_err(|e| Error::AddressError {
            address: address.to_string(),
            reason: e.to_string(),
        })?;
    let local = listener.local_addr().map_err(|e| Error::AddressError {
        address: address.to_string(),
        reason: e.to_string(),
    })?;
    tokio::spawn(accept_loop(listener, core));
    Ok(local)
}

/// Spawns a connector that keeps one session to `address` alive, retrying
/// every `reconnect_interval` until the endpoint closes.
pub(crate) fn connect(core: Arc<SocketCore>, address: &Address) -> Result<()> {
    let target = target(address)?;
    tokio::spawn(connect_loop(core, target));
    Ok(())
}

async fn accept_loop(listener: TcpListener, core: Arc<SocketCore>) {
    loop {
        let accepted = tokio::select! {
            () = core.token.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, remote)) => {
                trace!(%remote, "accepted connection");
                tokio::spawn(run_session(stream, core.clone()));
            }
            Err(e) => warn!(error = %e, "accept failed"),
        }
    }
    trace!("listener stopped");
}

async fn connect_loop(core: Arc<SocketCore>, target: String) {
    loop {
        let connected = tokio::select! {
            () = core.token.cancelled() => return,
            connected = TcpStream::connect(&target) => connected,
        };
        match connected {
            Ok(stream) => {
                debug!(%target, "connected");
                run_session(stream, core.clone()).await;
            }
            Err(e) => trace!(%target, error = %e, "connect failed, retrying"),
        }
        tokio::select! {
            () = core.token.cancelled() => return,
            () = tokio::time::sleep(core.options.reconnect_interval) => {}
        }
    }
}

async fn run_session(stream: TcpStream, core: Arc<SocketCore>) {
    match session(stream, &core).await {
        Ok(()) => {}
        Err(e @ Error::Protocol { .. }) => {
            warn!(kind = %core.kind, error = %e, "dropping connection");
        }
        Err(e) => debug!(kind = %core.kind, error = %e, "session ended"),
    }
}

/// Greets the remote side, attaches it as a peer, then pumps records in both
/// directions until either side hangs up or the endpoint closes.
async fn session(stream: TcpStream, core: &SocketCore) -> Result<()> {
    let _ = stream.set_nodelay(true);
    let (read, write) = stream.into_split();
    let mut reader = FramedRead::new(read, LengthDelimitedCodec::new());
    let mut writer = FramedWrite::new(write, LengthDelimitedCodec::new());

    let identity = core.identity();
    writer
        .send(wire::encode_greeting(core.kind, identity.as_ref()))
        .await
        .map_err(io_error)?;
    let record = tokio::select! {
        () = core.token.cancelled() => return Ok(()),
        record = reader.next() => record,
    };
    let greeting = match record {
        Some(record) => wire::decode_greeting(record.map_err(io_error)?.freeze())?,
        None => return Ok(()),
    };
    if !core.kind.is_compatible(greeting.kind) {
        return Err(Error::Protocol {
            context: format!("{} cannot talk to {}", core.kind, greeting.kind),
        });
    }

    let outbox = Arc::new(Inbox::new(core.options.high_water_mark));
    let pipe = Pipe::new(outbox.clone(), Identity::new(Bytes::new()));
    let attached = core
        .peers
        .attach_resolved(greeting.identity, core.kind.max_peers(), pipe);
    let Some((peer_id, peer)) = attached else {
        return Err(Error::Protocol {
            context: format!("{} endpoints accept a single peer", core.kind),
        });
    };
    debug!(kind = %core.kind, %peer, "tcp peer attached");

    let outbound = async {
        while let Some(item) = outbox.pop().await {
            for record in wire::encode_message(&item.message) {
                writer.feed(record).await.map_err(io_error)?;
            }
            SinkExt::<Bytes>::flush(&mut writer).await.map_err(io_error)?;
        }
        Ok::<(), Error>(())
    };
    let inbound = async {
        let mut assembler = MessageAssembler::default();
        while let Some(record) = reader.next().await {
            let Some(message) = assembler.push(record.map_err(io_error)?.freeze())? else {
                continue;
            };
            if core.inbox.deliver(peer.clone(), message).await.is_err() {
                break;
            }
        }
        Ok::<(), Error>(())
    };

    let result = tokio::select! {
        () = core.token.cancelled() => Ok(()),
        result = outbound => result,
        result = inbound => result,
    };

    core.peers.detach(peer_id);
    outbox.close();
    debug!(kind = %core.kind, %peer, "tcp peer detached");
    result
}

fn io_error(e: std::io::Error) -> Error {
    Error::SendFailure {
        reason: e.to_string(),
    }
}
