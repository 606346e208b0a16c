//! Wire protocol plumbing: the BER message codec and result parsing.
//!
//! Every LDAP PDU travels inside an envelope: a sequence of the message ID,
//! the protocol op, and optional request/response controls. The codec
//! produces and consumes whole envelopes; correlation of a response with
//! the operation that requested it happens in the connection driver, by
//! message ID alone.

use std::collections::HashSet;

use bytes::BytesMut;
use log::{debug, trace};
use tokio_util::codec::{Decoder, Encoder};

use lber::common::TagClass;
use lber::parse::{parse_uint, Parser};
use lber::structure::{StructureTag, PL};
use lber::structures::{ASNTag, Integer, Sequence, Tag};
use lber::universal::Types;

use crate::controls::{parse_controls, Control};
use crate::ldap::RequestId;
use crate::result::{LdapError, LdapResult};
use crate::search::parse_refs;

/// Request controls, already serialized to their wire structure.
pub(crate) type MaybeControls = Option<Vec<StructureTag>>;

/// One correlated response: the protocol op and any response controls.
pub(crate) type ResponseItem = (StructureTag, Vec<Control>);

pub(crate) struct LdapCodec;

impl Decoder for LdapCodec {
    type Item = (RequestId, StructureTag, Vec<Control>);
    type Error = LdapError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let mut parser = Parser::new();
        let (amt, tag) = match parser.parse(&buf[..]) {
            Ok((rest, tag)) => (buf.len() - rest.len(), tag),
            Err(nom::Err::Incomplete(_)) => return Ok(None),
            Err(_) => return Err(LdapError::DecodingError("envelope")),
        };
        buf.split_to(amt);
        let mut tags = match tag
            .match_class(TagClass::Universal)
            .and_then(|t| t.match_id(Types::Sequence as u64))
            .and_then(|t| t.expect_constructed())
        {
            Some(tags) => tags,
            None => return Err(LdapError::DecodingError("envelope sequence")),
        };
        let mut ctrls = Vec::new();
        if tags.len() == 3 {
            let ctrl_tag = tags.pop().expect("element");
            match ctrl_tag
                .match_class(TagClass::Context)
                .and_then(|t| t.match_id(0))
            {
                Some(raw) => ctrls = parse_controls(raw),
                None => return Err(LdapError::DecodingError("response controls")),
            }
        }
        if tags.len() != 2 {
            return Err(LdapError::DecodingError("envelope component count"));
        }
        let protoop = tags.pop().expect("element");
        let id_bytes = match tags
            .pop()
            .expect("element")
            .match_class(TagClass::Universal)
            .and_then(|t| t.match_id(Types::Integer as u64))
            .and_then(|t| t.expect_primitive())
        {
            Some(id_bytes) => id_bytes,
            None => return Err(LdapError::DecodingError("message ID")),
        };
        let id = match parse_uint(id_bytes.as_slice()) {
            Ok((_, id)) => id as RequestId,
            _ => return Err(LdapError::DecodingError("message ID")),
        };
        debug!("received response for msgid {}, op {}", id, protoop.id);
        Ok(Some((id, protoop, ctrls)))
    }
}

impl Encoder<(RequestId, Tag, MaybeControls)> for LdapCodec {
    type Error = LdapError;

    fn encode(
        &mut self,
        msg: (RequestId, Tag, MaybeControls),
        buf: &mut BytesMut,
    ) -> Result<(), Self::Error> {
        let (id, tag, controls) = msg;
        let outstruct = {
            let mut envelope = vec![
                Tag::Integer(Integer {
                    inner: id as i64,
                    ..Default::default()
                }),
                tag,
            ];
            if let Some(controls) = controls {
                envelope.push(Tag::StructureTag(StructureTag {
                    id: 0,
                    class: TagClass::Context,
                    payload: PL::C(controls),
                }));
            }
            Tag::Sequence(Sequence {
                inner: envelope,
                ..Default::default()
            })
            .into_structure()
        };
        trace!("sending packet: {:?}", &outstruct);
        write_struct(buf, outstruct)?;
        Ok(())
    }
}

fn write_struct(buf: &mut BytesMut, outstruct: StructureTag) -> Result<(), LdapError> {
    lber::write::encode_into(buf, outstruct)?;
    Ok(())
}

/// Parsed form of a result-bearing protocol op.
///
/// __Note__: panics on a structurally malformed result body, like the
/// search entry parser; the server is trusted to emit well-formed results.
#[derive(Clone, Debug)]
pub struct LdapResultExt(pub LdapResult);

impl From<Tag> for LdapResultExt {
    fn from(t: Tag) -> LdapResultExt {
        let t = match t {
            Tag::StructureTag(t) => t,
            _ => unimplemented!("result from non-structure tag"),
        };
        let mut tags = t
            .expect_constructed()
            .expect("result sequence")
            .into_iter();
        let rc = match parse_uint(
            tags.next()
                .expect("element")
                .match_class(TagClass::Universal)
                .and_then(|t| t.match_id(Types::Enumerated as u64))
                .and_then(|t| t.expect_primitive())
                .expect("result code")
                .as_slice(),
        ) {
            Ok((_, rc)) => rc as u32,
            _ => panic!("failed to parse result code"),
        };
        let matched = String::from_utf8(
            tags.next()
                .expect("element")
                .expect_primitive()
                .expect("octet string"),
        )
        .expect("matched dn");
        let text = String::from_utf8(
            tags.next()
                .expect("element")
                .expect_primitive()
                .expect("octet string"),
        )
        .expect("diagnostic message");
        let mut refs = Vec::new();
        for tag in tags {
            // Referral URIs ride in a context-specific [3] component.
            if tag.class == TagClass::Context && tag.id == 3 {
                refs.push(parse_refs(tag).into_iter().collect::<HashSet<String>>());
            }
        }
        LdapResultExt(LdapResult {
            rc,
            matched,
            text,
            refs,
            ctrls: vec![],
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use lber::structures::{Enumerated, OctetString};

    fn result_op(rc: i64, text: &str) -> Tag {
        Tag::Sequence(Sequence {
            id: 1,
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
        })
    }

    #[test]
    fn envelope_round_trip() {
        let mut codec = LdapCodec;
        let mut buf = BytesMut::new();
        codec
            .encode((7, result_op(0, ""), None), &mut buf)
            .expect("encode");
        let (id, protoop, ctrls) = codec.decode(&mut buf).expect("decode").expect("envelope");
        assert_eq!(id, 7);
        assert_eq!(protoop.id, 1);
        assert!(ctrls.is_empty());
        assert!(buf.is_empty());
        let res = LdapResultExt::from(Tag::StructureTag(protoop)).0;
        assert_eq!(res.rc, 0);
    }

    #[test]
    fn partial_envelope_needs_more_data() {
        let mut codec = LdapCodec;
        let mut buf = BytesMut::new();
        codec
            .encode((1, result_op(32, "no such object"), None), &mut buf)
            .expect("encode");
        let full = buf.clone();
        let mut partial = full.clone();
        partial.truncate(3);
        assert!(codec.decode(&mut partial).expect("decode").is_none());
        let (_, protoop, _) = codec.decode(&mut buf).expect("decode").expect("envelope");
        let res = LdapResultExt::from(Tag::StructureTag(protoop)).0;
        assert_eq!(res.rc, 32);
        assert_eq!(res.text, "no such object");
    }
}
