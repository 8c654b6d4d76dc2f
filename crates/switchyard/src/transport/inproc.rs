use crate::transport::endpoint::SocketCore;
use crate::transport::peer::{LinkEnd, attach_linked};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use switchyard_core::{Error, Result};
use tracing::{debug, warn};

/// In-process address space of one context.
///
/// Connecting to a name nobody has bound yet is not an error: the connector
/// is parked and linked as soon as the name is bound.
#[derive(Default)]
pub(crate) struct InprocRegistry {
    bound: HashMap<String, Weak<SocketCore>>,
    pending: HashMap<String, Vec<Weak<SocketCore>>>,
}

impl InprocRegistry {
    /// Registers `core` under `name` and returns the parked connectors that
    /// should now be linked to it.
    pub(crate) fn bind(
        &mut self,
        name: &str,
        core: &Arc<SocketCore>,
    ) -> Result<Vec<Arc<SocketCore>>> {
        if self.lookup(name).is_some() {
            return Err(Error::AddressError {
                address: format!("inproc://{name}"),
                reason: "address already in use".to_string(),
            });
        }
        self.bound.insert(name.to_string(), Arc::downgrade(core));
        Ok(self
            .pending
            .remove(name)
            .unwrap_or_default()
            .iter()
            .filter_map(Weak::upgrade)
            .collect())
    }

    pub(crate) fn lookup(&self, name: &str) -> Option<Arc<SocketCore>> {
        self.bound.get(name).and_then(Weak::upgrade)
    }

    pub(crate) fn park(&mut self, name: &str, core: &Arc<SocketCore>) {
        let waiting = self.pending.entry(name.to_string()).or_default();
        waiting.retain(|w| w.strong_count() > 0);
        waiting.push(Arc::downgrade(core));
    }

    pub(crate) fn unbind(&mut self, name: &str, core: &Arc<SocketCore>) {
        let owned = self
            .bound
            .get(name)
            .is_some_and(|w| std::ptr::eq(w.as_ptr(), Arc::as_ptr(core)));
        if owned {
            self.bound.remove(name);
        }
    }
}

/// Links two endpoints of one context in both directions.
///
/// Each side resolves the identity it addresses the other by before either
/// pipe is created, so the identity a router stamps on inbound messages is
/// the same one it routes replies by. Peers that have already closed no
/// longer hold their identity.
pub(crate) fn link(binder: &SocketCore, connector: &SocketCore) -> Result<()> {
    if std::ptr::eq(binder, connector) {
        return Err(Error::Protocol {
            context: "an endpoint cannot connect to itself".to_string(),
        });
    }
    if !connector.kind.is_compatible(binder.kind) {
        return Err(Error::Protocol {
            context: format!("{} cannot connect to {}", connector.kind, binder.kind),
        });
    }

    let linked = attach_linked(
        LinkEnd {
            peers: &binder.peers,
            inbox: &binder.inbox,
            identity: binder.identity(),
            max_peers: binder.kind.max_peers(),
        },
        LinkEnd {
            peers: &connector.peers,
            inbox: &connector.inbox,
            identity: connector.identity(),
            max_peers: connector.kind.max_peers(),
        },
    );
    let Some((binder_sees, _)) = linked else {
        return Err(Error::Protocol {
            context: format!("{} endpoints accept a single peer", binder.kind),
        });
    };

    debug!(peer = %binder_sees, kind = %connector.kind, "inproc peer attached");
    Ok(())
}

/// Links every parked connector, logging the ones that turn out to be
/// incompatible.
pub(crate) fn link_pending(binder: &SocketCore, connectors: Vec<Arc<SocketCore>>, name: &str) {
    for connector in connectors {
        if let Err(e) = link(binder, &connector) {
            warn!(address = name, error = %e, "dropping parked inproc connection");
        }
    }
}
