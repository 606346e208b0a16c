use std::convert::AsRef;

use lber::common::TagClass;
use lber::structures::{OctetString, Sequence, Tag};

use crate::ldap::{Ldap, OpKind, RequestId};
use crate::result::Result;

impl Ldap {
    /// Submit a Compare of an attribute value against the entry at `dn`,
    /// returning the message ID to poll.
    ///
    /// Completion distinguishes a negative comparison from an error: a
    /// compareFalse result polls as `Compared(false)`, not as a failure.
    pub fn dispatch_compare<B: AsRef<[u8]>>(
        &mut self,
        dn: &str,
        attr: &str,
        val: B,
    ) -> Result<RequestId> {
        let req = Tag::Sequence(Sequence {
            id: 14,
            class: TagClass::Application,
            inner: vec![
                Tag::OctetString(OctetString {
                    inner: Vec::from(dn.as_bytes()),
                    ..Default::default()
                }),
                Tag::Sequence(Sequence {
                    inner: vec![
                        Tag::OctetString(OctetString {
                            inner: Vec::from(attr.as_bytes()),
                            ..Default::default()
                        }),
                        Tag::OctetString(OctetString {
                            inner: Vec::from(val.as_ref()),
                            ..Default::default()
                        }),
                    ],
                    ..Default::default()
                }),
            ],
        });
        self.op_send(OpKind::Compare, req, None)
    }
}
