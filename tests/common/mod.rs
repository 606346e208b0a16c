//! Scripted in-process LDAP server backing the engine tests.
//!
//! The server accepts connections on a loopback port and answers each
//! request from a fixed script: one bind identity, one directory entry,
//! and a DN whose Compare is deliberately never answered, for exercising
//! client-side deadlines.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;

use bytes::BytesMut;

use ldap_poll::lber::common::TagClass;
use ldap_poll::lber::parse::{parse_uint, Parser};
use ldap_poll::lber::structure::StructureTag;
use ldap_poll::lber::structures::{ASNTag, Enumerated, Integer, OctetString, Sequence, Set, Tag};
use ldap_poll::lber::write::encode_into;

pub const BIND_DN: &str = "cn=admin,dc=example,dc=com";
pub const BIND_PW: &str = "secret";
pub const ENTRY_DN: &str = "cn=test,dc=example,dc=com";
pub const BLACKHOLE_DN: &str = "cn=blackhole,dc=example,dc=com";

/// Start the server and return the URL to connect to it.
pub fn spawn_server() -> String {
    let _ = env_logger::builder().is_test(true).try_init();
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind listener");
    let addr = listener.local_addr().expect("listener addr");
    thread::spawn(move || {
        for stream in listener.incoming() {
            match stream {
                Ok(stream) => serve(stream),
                Err(_) => break,
            }
        }
    });
    format!("ldap://{}", addr)
}

fn serve(mut stream: TcpStream) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        while let Some((amt, envelope)) = parse_envelope(&buf) {
            buf.drain(..amt);
            if !respond(&mut stream, envelope) {
                return;
            }
        }
        match stream.read(&mut chunk) {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
}

fn parse_envelope(buf: &[u8]) -> Option<(usize, StructureTag)> {
    let mut parser = Parser::new();
    match parser.parse(buf) {
        Ok((rest, tag)) => Some((buf.len() - rest.len(), tag)),
        Err(_) => None,
    }
}

/// Handle one envelope. Returns false when the connection should close.
fn respond(stream: &mut TcpStream, envelope: StructureTag) -> bool {
    let mut tags = envelope
        .expect_constructed()
        .expect("envelope")
        .into_iter();
    let msgid = match parse_uint(
        tags.next()
            .expect("message ID")
            .expect_primitive()
            .expect("message ID bytes")
            .as_slice(),
    ) {
        Ok((_, id)) => id as i64,
        _ => panic!("unparseable message ID"),
    };
    let protoop = tags.next().expect("protocol op");
    match protoop.id {
        // bind
        0 => {
            let mut parts = protoop
                .expect_constructed()
                .expect("bind request")
                .into_iter();
            let _version = parts.next().expect("version");
            let _dn = parts.next().expect("bind dn");
            let pw = parts
                .next()
                .expect("password")
                .expect_primitive()
                .expect("password bytes");
            let (rc, text) = if pw == BIND_PW.as_bytes() {
                (0, "")
            } else {
                (49, "invalid credentials")
            };
            send(stream, result_envelope(msgid, 1, rc, text));
        }
        // search: one fixture entry, then the result
        3 => {
            send(stream, entry_envelope(msgid));
            send(stream, result_envelope(msgid, 5, 0, ""));
        }
        // compare
        14 => {
            let mut parts = protoop
                .expect_constructed()
                .expect("compare request")
                .into_iter();
            let dn = parts
                .next()
                .expect("dn")
                .expect_primitive()
                .expect("dn bytes");
            if dn == BLACKHOLE_DN.as_bytes() {
                // scripted to never answer
                return true;
            }
            let mut ava = parts
                .next()
                .expect("ava")
                .expect_constructed()
                .expect("ava parts")
                .into_iter();
            let _attr = ava.next().expect("attribute");
            let val = ava
                .next()
                .expect("value")
                .expect_primitive()
                .expect("value bytes");
            let rc = if val == b"test" { 6 } else { 5 };
            send(stream, result_envelope(msgid, 15, rc, ""));
        }
        // modify
        6 => send(stream, result_envelope(msgid, 7, 0, "")),
        // abandon elicits no response
        16 => (),
        // unbind
        2 => return false,
        other => panic!("unexpected protocol op {}", other),
    }
    true
}

fn send(stream: &mut TcpStream, buf: BytesMut) {
    let _ = stream.write_all(&buf);
}

fn envelope(msgid: i64, op: Tag) -> BytesMut {
    let envelope = Tag::Sequence(Sequence {
        inner: vec![
            Tag::Integer(Integer {
                inner: msgid,
                ..Default::default()
            }),
            op,
        ],
        ..Default::default()
    })
    .into_structure();
    let mut buf = BytesMut::new();
    encode_into(&mut buf, envelope).expect("encode");
    buf
}

fn result_envelope(msgid: i64, op_id: u64, rc: i64, text: &str) -> BytesMut {
    envelope(
        msgid,
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
                    inner: Vec::from(text.as_bytes()),
                    ..Default::default()
                }),
            ],
        }),
    )
}

fn entry_envelope(msgid: i64) -> BytesMut {
    envelope(
        msgid,
        Tag::Sequence(Sequence {
            id: 4,
            class: TagClass::Application,
            inner: vec![
                Tag::OctetString(OctetString {
                    inner: Vec::from(ENTRY_DN.as_bytes()),
                    ..Default::default()
                }),
                Tag::Sequence(Sequence {
                    inner: vec![Tag::Sequence(Sequence {
                        inner: vec![
                            Tag::OctetString(OctetString {
                                inner: Vec::from(&b"cn"[..]),
                                ..Default::default()
                            }),
                            Tag::Set(Set {
                                inner: vec![Tag::OctetString(OctetString {
                                    inner: Vec::from(&b"test"[..]),
                                    ..Default::default()
                                })],
                                ..Default::default()
                            }),
                        ],
                        ..Default::default()
                    })],
                    ..Default::default()
                }),
            ],
        }),
    )
}
