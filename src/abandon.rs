use lber::common::TagClass;
use lber::structures::{Integer, Tag};

use crate::conn::RequestMessage;
use crate::ldap::{Ldap, OpKind, RequestId};
use crate::result::{LdapError, Result};

impl Ldap {
    /// Abandon the operation with the given message ID.
    ///
    /// The operation is dropped locally first, so any response the server
    /// still sends for it is discarded by the driver, and a later poll of
    /// the ID reports the abandonment instead of hanging. The Abandon PDU
    /// itself elicits no response from the server.
    pub fn abandon(&mut self, id: RequestId) -> Result<()> {
        let mut core = self.lock_core();
        let op = core
            .ops
            .remove(&id)
            .ok_or(LdapError::UnknownMessageId(id))?;
        if op.kind == OpKind::Bind {
            core.bind_in_flight = false;
        }
        core.abandoned.insert(id);
        let next_id = core.alloc_id();
        drop(core);
        let req = Tag::Integer(Integer {
            id: 16,
            class: TagClass::Application,
            inner: id as i64,
        });
        self.tx
            .send(RequestMessage::Solo { id: next_id, tag: req })
            .map_err(|_| LdapError::EndOfStream)?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn abandon_unknown_id_is_an_error() {
        let (mut ldap, _rx) = Ldap::disconnected_for_tests();
        let err = ldap.abandon(42).expect_err("abandon");
        assert!(matches!(err, LdapError::UnknownMessageId(42)));
    }

    #[test]
    fn abandon_clears_the_in_flight_bind() {
        let (mut ldap, mut rx) = Ldap::disconnected_for_tests();
        let id = ldap.dispatch_simple_bind("cn=admin", "secret").expect("bind");
        rx.try_recv().expect("bind request");
        ldap.abandon(id).expect("abandon");
        assert!(matches!(
            rx.try_recv().expect("abandon request"),
            RequestMessage::Solo { .. }
        ));
        // a fresh bind is allowed again
        ldap.dispatch_simple_bind("cn=admin", "secret").expect("rebind");
    }
}
