//! Operation handle and per-connection bookkeeping.
//!
//! An [`Ldap`] value is the dispatch surface of one connection: it checks
//! the connection state machine, allocates message IDs, registers the
//! operation with the driver, and hands back the ID for later polling.
//! The handle is cheaply cloneable; all clones share the same connection
//! core and the same driver.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use lber::structures::Tag;

use crate::conn::RequestMessage;
use crate::protocol::{MaybeControls, ResponseItem};
use crate::result::{LdapError, Result};

/// Per-connection correlation identifier of an outstanding operation.
///
/// IDs are allocated monotonically starting from 1. Zero is reserved by
/// the protocol for unsolicited notifications and is never issued.
pub type RequestId = i32;

/// Connection lifecycle states.
///
/// Transitions are monotonic: `Unbound` and `Errored` are terminal, and a
/// connection in a terminal state must be discarded and recreated; it
/// cannot be reinitialized in place.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnState {
    /// No session has been established.
    Uninitialized,
    /// Session established, protocol version negotiated, not yet bound.
    Initialized,
    /// A Bind has completed successfully.
    Bound,
    /// Unbind was performed; terminal.
    Unbound,
    /// The connection failed; terminal.
    Errored,
}

impl ConnState {
    /// True if operations may be submitted in this state.
    pub fn permits_dispatch(self) -> bool {
        matches!(self, ConnState::Initialized | ConnState::Bound)
    }
}

/// Kind of a dispatched operation, used to interpret its responses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpKind {
    Bind,
    Search,
    Compare,
    Modify,
}

pub(crate) struct PendingOp {
    pub kind: OpKind,
    pub submitted: Instant,
    pub rx: mpsc::UnboundedReceiver<ResponseItem>,
    /// Referral sets seen mid-search, folded into the final result.
    pub refs: Vec<HashSet<String>>,
}

pub(crate) struct LdapCore {
    pub state: ConnState,
    pub bind_in_flight: bool,
    pub ops: HashMap<RequestId, PendingOp>,
    pub abandoned: HashSet<RequestId>,
    next_id: RequestId,
}

impl LdapCore {
    pub fn alloc_id(&mut self) -> RequestId {
        // Zero is reserved for unsolicited notifications; after the
        // counter wraps, IDs that are still outstanding or were
        // abandoned must not be reissued.
        loop {
            let id = self.next_id;
            self.next_id = if self.next_id == RequestId::MAX {
                1
            } else {
                self.next_id + 1
            };
            if !self.ops.contains_key(&id) && !self.abandoned.contains(&id) {
                return id;
            }
        }
    }
}

/// Handle for dispatching operations on one established connection.
#[derive(Clone)]
pub struct Ldap {
    pub(crate) tx: mpsc::UnboundedSender<RequestMessage>,
    pub(crate) core: Arc<Mutex<LdapCore>>,
    /// Message ID of the last operation dispatched through this handle.
    pub last_id: RequestId,
}

impl Ldap {
    pub(crate) fn new(tx: mpsc::UnboundedSender<RequestMessage>) -> Ldap {
        Ldap {
            tx,
            core: Arc::new(Mutex::new(LdapCore {
                state: ConnState::Initialized,
                bind_in_flight: false,
                ops: HashMap::new(),
                abandoned: HashSet::new(),
                next_id: 1,
            })),
            last_id: 0,
        }
    }

    pub(crate) fn lock_core(&self) -> MutexGuard<LdapCore> {
        self.core.lock().expect("connection core mutex")
    }

    /// Current state of the connection this handle belongs to.
    pub fn state(&self) -> ConnState {
        self.lock_core().state
    }

    /// Message ID of the last operation dispatched through this handle.
    pub fn last_id(&self) -> RequestId {
        self.last_id
    }

    /// Time since the operation with the given ID was submitted, if it is
    /// still outstanding. Intended for external polling schedulers which
    /// enforce operation-level timeouts.
    pub fn op_elapsed(&self, id: RequestId) -> Option<Duration> {
        self.lock_core().ops.get(&id).map(|op| op.submitted.elapsed())
    }

    /// Register an operation and hand its request to the driver.
    ///
    /// This is the single funnel for all dispatches: the state machine is
    /// checked before anything is sent, a second in-flight Bind is
    /// rejected here, and a dead driver marks the connection `Errored`.
    pub(crate) fn op_send(
        &mut self,
        kind: OpKind,
        tag: Tag,
        controls: MaybeControls,
    ) -> Result<RequestId> {
        let mut core = self.lock_core();
        if !core.state.permits_dispatch() {
            return Err(LdapError::InvalidState(core.state));
        }
        if kind == OpKind::Bind && core.bind_in_flight {
            return Err(LdapError::BindInProgress);
        }
        let id = core.alloc_id();
        let (tx, rx) = mpsc::unbounded_channel();
        core.ops.insert(
            id,
            PendingOp {
                kind,
                submitted: Instant::now(),
                rx,
                refs: Vec::new(),
            },
        );
        if kind == OpKind::Bind {
            core.bind_in_flight = true;
        }
        drop(core);
        if self
            .tx
            .send(RequestMessage::Op {
                id,
                tag,
                controls,
                tx,
            })
            .is_err()
        {
            let mut core = self.lock_core();
            core.ops.remove(&id);
            if kind == OpKind::Bind {
                core.bind_in_flight = false;
            }
            core.state = ConnState::Errored;
            return Err(LdapError::EndOfStream);
        }
        self.last_id = id;
        Ok(id)
    }

    #[cfg(test)]
    pub(crate) fn disconnected_for_tests(
    ) -> (Ldap, mpsc::UnboundedReceiver<RequestMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Ldap::new(tx), rx)
    }

    #[cfg(test)]
    pub(crate) fn install_op_for_tests(
        &mut self,
        kind: OpKind,
    ) -> (RequestId, mpsc::UnboundedSender<ResponseItem>) {
        let mut core = self.lock_core();
        let id = core.alloc_id();
        let (tx, rx) = mpsc::unbounded_channel();
        core.ops.insert(
            id,
            PendingOp {
                kind,
                submitted: Instant::now(),
                rx,
                refs: Vec::new(),
            },
        );
        if kind == OpKind::Bind {
            core.bind_in_flight = true;
        }
        (id, tx)
    }

    #[cfg(test)]
    pub(crate) fn set_state_for_tests(&mut self, state: ConnState) {
        self.lock_core().state = state;
    }
}
