//! Synchronous interface to the connection engine.
//!
//! [`LdapConn`] owns a small Tokio runtime with a single worker thread,
//! on which the connection driver runs in the background. Dispatch and
//! poll calls are plain channel operations and never enter the runtime,
//! so they stay non-blocking; only [`wait()`](LdapConn::wait) and
//! connection setup block the calling thread.

use std::hash::Hash;
use std::time::{Duration, Instant};

use tokio::runtime::{self, Runtime};
use tokio::time;

use crate::conn::LdapConnAsync;
use crate::controls::RawControl;
use crate::ldap::{ConnState, Ldap, RequestId};
use crate::modify::Mod;
use crate::poll::PollOutcome;
use crate::result::{LdapError, LdapResult, Result};
use crate::search::{Scope, SearchEntry, SearchOptions};

const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Deadline used by the convenience operations. The dispatch/poll
/// surface has no built-in deadline; pass your own to `wait()`.
pub const DEFAULT_OP_TIMEOUT: Duration = Duration::from_secs(30);

/// Synchronous connection to an LDAP server.
pub struct LdapConn {
    rt: Runtime,
    ldap: Ldap,
}

impl LdapConn {
    /// Open a connection to an LDAP server specified by an URL.
    pub fn new(url: &str) -> Result<Self> {
        let rt = runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()?;
        let ldap = rt.block_on(async {
            let (conn, ldap) = LdapConnAsync::new(url).await?;
            crate::drive!(conn);
            Ok::<_, LdapError>(ldap)
        })?;
        Ok(LdapConn { rt, ldap })
    }

    /// Current state of the connection.
    pub fn state(&self) -> ConnState {
        self.ldap.state()
    }

    /// Message ID of the last dispatched operation.
    pub fn last_id(&self) -> RequestId {
        self.ldap.last_id()
    }

    /// See [`Ldap::dispatch_simple_bind()`](crate::Ldap::dispatch_simple_bind).
    pub fn dispatch_simple_bind(&mut self, bind_dn: &str, bind_pw: &str) -> Result<RequestId> {
        self.ldap.dispatch_simple_bind(bind_dn, bind_pw)
    }

    /// See [`Ldap::dispatch_search()`](crate::Ldap::dispatch_search).
    pub fn dispatch_search<S: AsRef<str>>(
        &mut self,
        base: &str,
        scope: Scope,
        filter: &str,
        attrs: Vec<S>,
        opts: SearchOptions,
        controls: Vec<RawControl>,
    ) -> Result<RequestId> {
        self.ldap.dispatch_search(base, scope, filter, attrs, opts, controls)
    }

    /// See [`Ldap::dispatch_compare()`](crate::Ldap::dispatch_compare).
    pub fn dispatch_compare<B: AsRef<[u8]>>(
        &mut self,
        dn: &str,
        attr: &str,
        val: B,
    ) -> Result<RequestId> {
        self.ldap.dispatch_compare(dn, attr, val)
    }

    /// See [`Ldap::dispatch_modify()`](crate::Ldap::dispatch_modify).
    pub fn dispatch_modify<S: AsRef<[u8]> + Eq + Hash>(
        &mut self,
        dn: &str,
        mods: Vec<Mod<S>>,
        controls: Vec<RawControl>,
    ) -> Result<RequestId> {
        self.ldap.dispatch_modify(dn, mods, controls)
    }

    /// See [`Ldap::poll()`](crate::Ldap::poll).
    pub fn poll(&mut self, id: RequestId) -> Result<PollOutcome> {
        self.ldap.poll(id)
    }

    /// See [`Ldap::abandon()`](crate::Ldap::abandon).
    pub fn abandon(&mut self, id: RequestId) -> Result<()> {
        self.ldap.abandon(id)
    }

    /// See [`Ldap::unbind()`](crate::Ldap::unbind).
    pub fn unbind(&mut self) -> Result<()> {
        self.ldap.unbind()
    }

    /// Poll the operation until it yields something other than
    /// [`PollOutcome::Pending`], or until `timeout` elapses.
    ///
    /// On timeout the operation is abandoned before the error is
    /// returned, so a late response cannot be mistaken for the result
    /// of a later operation.
    pub fn wait(&mut self, id: RequestId, timeout: Duration) -> Result<PollOutcome> {
        let start = Instant::now();
        loop {
            match self.ldap.poll(id)? {
                PollOutcome::Pending => {
                    if start.elapsed() >= timeout {
                        let _ = self.ldap.abandon(id);
                        return Err(LdapError::Timeout(timeout));
                    }
                    // the sleep future must be created on the runtime,
                    // or it cannot find the timer driver
                    self.rt.block_on(async { time::sleep(POLL_INTERVAL).await });
                }
                outcome => return Ok(outcome),
            }
        }
    }

    /// Simple bind, driven to completion.
    pub fn simple_bind(&mut self, bind_dn: &str, bind_pw: &str) -> Result<LdapResult> {
        let id = self.ldap.dispatch_simple_bind(bind_dn, bind_pw)?;
        match self.wait(id, DEFAULT_OP_TIMEOUT)? {
            PollOutcome::Done(res) => Ok(res),
            outcome => unreachable!("bind outcome: {:?}", outcome),
        }
    }

    /// Search, driven to completion. Returns the collected entries and
    /// the search result. If any part of the operation fails, already
    /// received entries are discarded and only the error is returned.
    pub fn search<S: AsRef<str>>(
        &mut self,
        base: &str,
        scope: Scope,
        filter: &str,
        attrs: Vec<S>,
    ) -> Result<(Vec<SearchEntry>, LdapResult)> {
        let id = self
            .ldap
            .dispatch_search(base, scope, filter, attrs, SearchOptions::default(), vec![])?;
        let mut entries = Vec::new();
        loop {
            match self.wait(id, DEFAULT_OP_TIMEOUT)? {
                PollOutcome::Entry(entry) => entries.push(entry),
                PollOutcome::Done(res) => return Ok((entries, res)),
                outcome => unreachable!("search outcome: {:?}", outcome),
            }
        }
    }

    /// Compare, driven to completion. `Ok(false)` means the comparison
    /// itself succeeded and the values differ.
    pub fn compare<B: AsRef<[u8]>>(&mut self, dn: &str, attr: &str, val: B) -> Result<bool> {
        let id = self.ldap.dispatch_compare(dn, attr, val)?;
        match self.wait(id, DEFAULT_OP_TIMEOUT)? {
            PollOutcome::Compared(res) => Ok(res),
            outcome => unreachable!("compare outcome: {:?}", outcome),
        }
    }

    /// Modify, driven to completion.
    pub fn modify<S: AsRef<[u8]> + Eq + Hash>(
        &mut self,
        dn: &str,
        mods: Vec<Mod<S>>,
    ) -> Result<LdapResult> {
        let id = self.ldap.dispatch_modify(dn, mods, vec![])?;
        match self.wait(id, DEFAULT_OP_TIMEOUT)? {
            PollOutcome::Done(res) => Ok(res),
            outcome => unreachable!("modify outcome: {:?}", outcome),
        }
    }
}
