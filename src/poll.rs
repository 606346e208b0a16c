//! Non-blocking retrieval of operation results.
//!
//! Polling never waits: each call inspects the responses the driver has
//! already routed to the operation and returns immediately, either with
//! a decoded item or with [`PollOutcome::Pending`]. Scheduling repeated
//! polls, and deciding when an operation has taken too long, is the
//! caller's business; [`op_elapsed()`](crate::Ldap::op_elapsed) and
//! [`abandon()`](crate::Ldap::abandon) are the hooks for it.

use tokio::sync::mpsc::error::TryRecvError;

use lber::structures::Tag;

use crate::ldap::{ConnState, Ldap, OpKind, RequestId};
use crate::protocol::LdapResultExt;
use crate::result::{LdapError, LdapResult, Result};
use crate::search::{parse_refs, ResultEntry, SearchEntry};

/// Outcome of a single poll of an outstanding operation.
#[derive(Debug)]
pub enum PollOutcome {
    /// No complete response has arrived yet; poll again later.
    Pending,
    /// One decoded search result entry, in server order.
    Entry(SearchEntry),
    /// Compare completed. `true` for compareTrue, `false` for
    /// compareFalse; neither is an error.
    Compared(bool),
    /// The operation completed successfully.
    Done(LdapResult),
}

impl Ldap {
    /// Poll the operation with the given message ID.
    ///
    /// Bind, Compare and Modify yield exactly one non-`Pending` outcome,
    /// after which the ID is forgotten and further polls report it as
    /// unknown. A Search yields its entries one per poll, in the order
    /// the server sent them, and finally the result; referral messages
    /// are folded into the final result rather than surfaced as items.
    ///
    /// A successful Bind moves the connection to the `Bound` state. If
    /// the driver has gone away with the operation still outstanding,
    /// the connection is marked `Errored`.
    pub fn poll(&mut self, id: RequestId) -> Result<PollOutcome> {
        let mut core = self.lock_core();
        if core.abandoned.contains(&id) {
            return Err(LdapError::AbandonedMessageId(id));
        }
        let op = core
            .ops
            .get_mut(&id)
            .ok_or(LdapError::UnknownMessageId(id))?;
        let kind = op.kind;
        let (protoop, ctrls) = match op.rx.try_recv() {
            Ok(item) => item,
            Err(TryRecvError::Empty) => return Ok(PollOutcome::Pending),
            Err(TryRecvError::Disconnected) => {
                core.ops.remove(&id);
                if kind == OpKind::Bind {
                    core.bind_in_flight = false;
                }
                // Unbound stays Unbound; only a live connection turns Errored.
                if core.state.permits_dispatch() {
                    core.state = ConnState::Errored;
                }
                return Err(LdapError::EndOfStream);
            }
        };
        if kind == OpKind::Search {
            match protoop.id {
                4 => return Ok(PollOutcome::Entry(SearchEntry::construct(ResultEntry(protoop, ctrls)))),
                19 => {
                    op.refs.push(parse_refs(protoop).into_iter().collect());
                    return Ok(PollOutcome::Pending);
                }
                // intermediate messages are mid-stream, nothing to decode
                25 => return Ok(PollOutcome::Pending),
                _ => (),
            }
        }
        let op = core.ops.remove(&id).expect("pending op");
        if kind == OpKind::Bind {
            core.bind_in_flight = false;
        }
        let mut result = LdapResultExt::from(Tag::StructureTag(protoop)).0;
        result.ctrls = ctrls;
        match kind {
            OpKind::Bind => {
                if result.rc == 0 {
                    // a late result must not resurrect a terminal state
                    if core.state.permits_dispatch() {
                        core.state = ConnState::Bound;
                    }
                    Ok(PollOutcome::Done(result))
                } else {
                    Err(LdapError::from(result))
                }
            }
            OpKind::Compare => match result.rc {
                6 => Ok(PollOutcome::Compared(true)),
                5 => Ok(PollOutcome::Compared(false)),
                _ => Err(LdapError::from(result)),
            },
            OpKind::Search => {
                let mut refs = op.refs;
                refs.extend(result.refs);
                result.refs = refs;
                if result.rc == 0 {
                    Ok(PollOutcome::Done(result))
                } else {
                    Err(LdapError::from(result))
                }
            }
            OpKind::Modify => {
                if result.rc == 0 {
                    Ok(PollOutcome::Done(result))
                } else {
                    Err(LdapError::from(result))
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::result::ErrorKind;
    use lber::common::TagClass;
    use lber::structure::StructureTag;
    use lber::structures::{ASNTag, Enumerated, OctetString, Sequence};

    fn result_op(op_id: u64, rc: i64) -> StructureTag {
        Tag::Sequence(Sequence {
            id: op_id,
            class: TagClass::Application,
            inner: vec![
                Tag::Enumerated(Enumerated {
                    inner: rc,
                    ..Default::default()
                }),
                Tag::OctetString(OctetString {
                    ..Default::default()
                }),
                Tag::OctetString(OctetString {
                    ..Default::default()
                }),
            ],
        })
        .into_structure()
    }

    fn entry_op(dn: &str) -> StructureTag {
        Tag::Sequence(Sequence {
            id: 4,
            class: TagClass::Application,
            inner: vec![
                Tag::OctetString(OctetString {
                    inner: Vec::from(dn.as_bytes()),
                    ..Default::default()
                }),
                Tag::Sequence(Sequence {
                    ..Default::default()
                }),
            ],
        })
        .into_structure()
    }

    #[test]
    fn unknown_id_is_an_error() {
        let (mut ldap, _rx) = Ldap::disconnected_for_tests();
        assert!(matches!(
            ldap.poll(9).expect_err("poll"),
            LdapError::UnknownMessageId(9)
        ));
    }

    #[test]
    fn empty_queue_polls_as_pending() {
        let (mut ldap, _rx) = Ldap::disconnected_for_tests();
        let (id, _tx) = ldap.install_op_for_tests(OpKind::Modify);
        assert!(matches!(ldap.poll(id).expect("poll"), PollOutcome::Pending));
        assert!(matches!(ldap.poll(id).expect("poll"), PollOutcome::Pending));
    }

    #[test]
    fn successful_bind_moves_to_bound() {
        let (mut ldap, _rx) = Ldap::disconnected_for_tests();
        let (id, tx) = ldap.install_op_for_tests(OpKind::Bind);
        tx.send((result_op(1, 0), vec![])).expect("send");
        match ldap.poll(id).expect("poll") {
            PollOutcome::Done(res) => assert_eq!(res.rc, 0),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(ldap.state(), ConnState::Bound);
        assert!(!ldap.lock_core().bind_in_flight);
        // the result has been consumed
        assert!(matches!(
            ldap.poll(id).expect_err("poll"),
            LdapError::UnknownMessageId(_)
        ));
    }

    #[test]
    fn late_bind_result_cannot_reopen_an_unbound_connection() {
        let (mut ldap, _rx) = Ldap::disconnected_for_tests();
        let (id, tx) = ldap.install_op_for_tests(OpKind::Bind);
        ldap.unbind().expect("unbind");
        tx.send((result_op(1, 0), vec![])).expect("send");
        assert!(matches!(ldap.poll(id).expect("poll"), PollOutcome::Done(_)));
        assert_eq!(ldap.state(), ConnState::Unbound);
        assert!(matches!(
            ldap.dispatch_simple_bind("cn=admin", "secret").expect_err("dispatch"),
            LdapError::InvalidState(ConnState::Unbound)
        ));
    }

    #[test]
    fn intermediate_messages_do_not_complete_a_search() {
        let (mut ldap, _rx) = Ldap::disconnected_for_tests();
        let (id, tx) = ldap.install_op_for_tests(OpKind::Search);
        let intermediate = Tag::Sequence(Sequence {
            id: 25,
            class: TagClass::Application,
            inner: vec![],
        })
        .into_structure();
        tx.send((intermediate, vec![])).expect("send");
        tx.send((result_op(5, 0), vec![])).expect("send");
        assert!(matches!(ldap.poll(id).expect("poll"), PollOutcome::Pending));
        assert!(matches!(ldap.poll(id).expect("poll"), PollOutcome::Done(_)));
    }

    #[test]
    fn failed_bind_reports_auth_and_permits_retry() {
        let (mut ldap, _rx) = Ldap::disconnected_for_tests();
        let (id, tx) = ldap.install_op_for_tests(OpKind::Bind);
        tx.send((result_op(1, 49), vec![])).expect("send");
        let err = ldap.poll(id).expect_err("poll");
        assert_eq!(err.kind(), ErrorKind::Auth);
        assert_eq!(ldap.state(), ConnState::Initialized);
        assert!(!ldap.lock_core().bind_in_flight);
    }

    #[test]
    fn compare_false_is_not_an_error() {
        let (mut ldap, _rx) = Ldap::disconnected_for_tests();
        let (id, tx) = ldap.install_op_for_tests(OpKind::Compare);
        tx.send((result_op(15, 5), vec![])).expect("send");
        assert!(matches!(
            ldap.poll(id).expect("poll"),
            PollOutcome::Compared(false)
        ));
        let (id, tx) = ldap.install_op_for_tests(OpKind::Compare);
        tx.send((result_op(15, 6), vec![])).expect("send");
        assert!(matches!(
            ldap.poll(id).expect("poll"),
            PollOutcome::Compared(true)
        ));
    }

    #[test]
    fn search_yields_entries_then_result() {
        let (mut ldap, _rx) = Ldap::disconnected_for_tests();
        let (id, tx) = ldap.install_op_for_tests(OpKind::Search);
        tx.send((entry_op("cn=a,dc=example,dc=com"), vec![])).expect("send");
        tx.send((entry_op("cn=b,dc=example,dc=com"), vec![])).expect("send");
        tx.send((result_op(5, 0), vec![])).expect("send");
        match ldap.poll(id).expect("poll") {
            PollOutcome::Entry(e) => assert_eq!(e.dn, "cn=a,dc=example,dc=com"),
            other => panic!("unexpected outcome: {:?}", other),
        }
        match ldap.poll(id).expect("poll") {
            PollOutcome::Entry(e) => assert_eq!(e.dn, "cn=b,dc=example,dc=com"),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(matches!(ldap.poll(id).expect("poll"), PollOutcome::Done(_)));
        assert!(matches!(
            ldap.poll(id).expect_err("poll"),
            LdapError::UnknownMessageId(_)
        ));
    }

    #[test]
    fn search_referrals_fold_into_the_result() {
        let (mut ldap, _rx) = Ldap::disconnected_for_tests();
        let (id, tx) = ldap.install_op_for_tests(OpKind::Search);
        let referral = Tag::Sequence(Sequence {
            id: 19,
            class: TagClass::Application,
            inner: vec![Tag::OctetString(OctetString {
                inner: Vec::from(&b"ldap://other.example.com/dc=example,dc=com"[..]),
                ..Default::default()
            })],
        })
        .into_structure();
        tx.send((referral, vec![])).expect("send");
        tx.send((result_op(5, 0), vec![])).expect("send");
        assert!(matches!(ldap.poll(id).expect("poll"), PollOutcome::Pending));
        match ldap.poll(id).expect("poll") {
            PollOutcome::Done(res) => {
                assert_eq!(res.refs.len(), 1);
                assert!(res.refs[0].contains("ldap://other.example.com/dc=example,dc=com"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn dead_driver_ends_the_stream() {
        let (mut ldap, _rx) = Ldap::disconnected_for_tests();
        let (id, tx) = ldap.install_op_for_tests(OpKind::Modify);
        drop(tx);
        assert!(matches!(
            ldap.poll(id).expect_err("poll"),
            LdapError::EndOfStream
        ));
        assert_eq!(ldap.state(), ConnState::Errored);
    }

    #[test]
    fn abandoned_id_polls_as_abandoned() {
        let (mut ldap, _rx) = Ldap::disconnected_for_tests();
        let (id, _tx) = ldap.install_op_for_tests(OpKind::Search);
        ldap.abandon(id).expect("abandon");
        assert!(matches!(
            ldap.poll(id).expect_err("poll"),
            LdapError::AbandonedMessageId(_)
        ));
    }
}
