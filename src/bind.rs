use lber::common::TagClass;
use lber::structures::{Integer, OctetString, Sequence, Tag};

use crate::ldap::{Ldap, OpKind, RequestId};
use crate::result::Result;

impl Ldap {
    /// Submit a simple Bind with the given DN and password, returning the
    /// message ID to poll for completion.
    ///
    /// The request carries protocol version 3; a server unwilling to
    /// serve that version fails the bind with protocolError. At most one
    /// Bind may be outstanding per connection: a second dispatch before
    /// the first completes is rejected without any network traffic.
    pub fn dispatch_simple_bind(&mut self, bind_dn: &str, bind_pw: &str) -> Result<RequestId> {
        let req = Tag::Sequence(Sequence {
            id: 0,
            class: TagClass::Application,
            inner: vec![
                Tag::Integer(Integer {
                    inner: 3,
                    ..Default::default()
                }),
                Tag::OctetString(OctetString {
                    inner: Vec::from(bind_dn.as_bytes()),
                    ..Default::default()
                }),
                Tag::OctetString(OctetString {
                    id: 0,
                    class: TagClass::Context,
                    inner: Vec::from(bind_pw.as_bytes()),
                }),
            ],
        });
        self.op_send(OpKind::Bind, req, None)
    }
}
