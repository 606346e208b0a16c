use std::collections::HashSet;
use std::convert::AsRef;
use std::hash::Hash;

use lber::common::TagClass;
use lber::structures::{Enumerated, OctetString, Sequence, Set, Tag};

use crate::controls::{build_controls, RawControl};
use crate::ldap::{Ldap, OpKind, RequestId};
use crate::result::{LdapError, Result};

/// Possible sub-operations for the Modify operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Mod<S: AsRef<[u8]> + Eq + Hash> {
    /// Add an attribute, with at least one value.
    Add(S, HashSet<S>),
    /// Delete the entire attribute, or the given values of an attribute.
    Delete(S, HashSet<S>),
    /// Replace an existing attribute, setting its values to those in the
    /// set, or delete it if no values are given.
    Replace(S, HashSet<S>),
}

impl Ldap {
    /// Submit a Modify of the entry at `dn`, returning the message ID to
    /// poll. An `Add` with an empty value set is rejected locally before
    /// anything is sent.
    pub fn dispatch_modify<S: AsRef<[u8]> + Eq + Hash>(
        &mut self,
        dn: &str,
        mods: Vec<Mod<S>>,
        controls: Vec<RawControl>,
    ) -> Result<RequestId> {
        let mut any_add_empty = false;
        let req = Tag::Sequence(Sequence {
            id: 6,
            class: TagClass::Application,
            inner: vec![
                Tag::OctetString(OctetString {
                    inner: Vec::from(dn.as_bytes()),
                    ..Default::default()
                }),
                Tag::Sequence(Sequence {
                    inner: mods
                        .into_iter()
                        .map(|m| {
                            let mut is_add = false;
                            let (num, attr, set) = match m {
                                Mod::Add(attr, set) => {
                                    is_add = true;
                                    (0, attr, set)
                                }
                                Mod::Delete(attr, set) => (1, attr, set),
                                Mod::Replace(attr, set) => (2, attr, set),
                            };
                            if set.is_empty() && is_add {
                                any_add_empty = true;
                            }
                            let op = Tag::Enumerated(Enumerated {
                                inner: num,
                                ..Default::default()
                            });
                            let part_attr = Tag::Sequence(Sequence {
                                inner: vec![
                                    Tag::OctetString(OctetString {
                                        inner: Vec::from(attr.as_ref()),
                                        ..Default::default()
                                    }),
                                    Tag::Set(Set {
                                        inner: set
                                            .into_iter()
                                            .map(|val| {
                                                Tag::OctetString(OctetString {
                                                    inner: Vec::from(val.as_ref()),
                                                    ..Default::default()
                                                })
                                            })
                                            .collect(),
                                        ..Default::default()
                                    }),
                                ],
                                ..Default::default()
                            });
                            Tag::Sequence(Sequence {
                                inner: vec![op, part_attr],
                                ..Default::default()
                            })
                        })
                        .collect(),
                    ..Default::default()
                }),
            ],
        });
        if any_add_empty {
            return Err(LdapError::AddEmptyValueSet);
        }
        let controls = if controls.is_empty() {
            None
        } else {
            Some(build_controls(&controls)?)
        };
        self.op_send(OpKind::Modify, req, controls)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ldap::Ldap;

    #[test]
    fn add_with_empty_value_set_is_rejected() {
        let (mut ldap, mut rx) = Ldap::disconnected_for_tests();
        let err = ldap
            .dispatch_modify("cn=x,dc=example,dc=com", vec![Mod::Add("cn", HashSet::new())], vec![])
            .expect_err("empty add");
        assert!(matches!(err, LdapError::AddEmptyValueSet));
        assert!(rx.try_recv().is_err());
    }
}
