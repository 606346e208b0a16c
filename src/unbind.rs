use lber::common::TagClass;
use lber::structures::{Null, Tag};

use crate::conn::RequestMessage;
use crate::ldap::{ConnState, Ldap};
use crate::result::{LdapError, Result};

impl Ldap {
    /// Terminate the session.
    ///
    /// Writes the Unbind PDU and shuts the connection down; the
    /// transport is released exactly once, by the driver. The connection
    /// transitions to the terminal `Unbound` state, so a repeated unbind
    /// (or an unbind after a failure) is a caller error, reported
    /// cleanly instead of crashing.
    pub fn unbind(&mut self) -> Result<()> {
        let mut core = self.lock_core();
        if !core.state.permits_dispatch() {
            return Err(LdapError::InvalidState(core.state));
        }
        core.state = ConnState::Unbound;
        let id = core.alloc_id();
        drop(core);
        let req = Tag::Null(Null {
            id: 2,
            class: TagClass::Application,
            inner: (),
        });
        self.tx
            .send(RequestMessage::Unbind { id, tag: req })
            .map_err(|_| LdapError::EndOfStream)?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn second_unbind_fails_cleanly() {
        let (mut ldap, mut rx) = Ldap::disconnected_for_tests();
        ldap.unbind().expect("first unbind");
        assert_eq!(ldap.state(), ConnState::Unbound);
        assert!(matches!(
            rx.try_recv().expect("request"),
            RequestMessage::Unbind { .. }
        ));
        let err = ldap.unbind().expect_err("second unbind");
        assert!(matches!(err, LdapError::InvalidState(ConnState::Unbound)));
    }

    #[test]
    fn dispatch_after_unbind_fails() {
        let (mut ldap, _rx) = Ldap::disconnected_for_tests();
        ldap.unbind().expect("unbind");
        let err = ldap
            .dispatch_simple_bind("cn=admin", "secret")
            .expect_err("bind after unbind");
        assert!(matches!(err, LdapError::InvalidState(ConnState::Unbound)));
    }
}
