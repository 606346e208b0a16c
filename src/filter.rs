//! String filter parser, RFC 4515 syntax.
//!
//! Parses the string representation into the BER structure carried by a
//! Search request. Assertion values may contain backslash escapes of two
//! hex digits, which are decoded here; the escaped form of `*` is the
//! only way to use the character literally in an equality value.

use nom::branch::alt;
use nom::bytes::complete::{tag, take_while, take_while1, take_while_m_n};
use nom::character::complete::{char, digit1};
use nom::combinator::{map, opt, recognize, value, verify};
use nom::error::{Error, ErrorKind};
use nom::multi::{many0, many1};
use nom::sequence::{delimited, pair, preceded};
use nom::IResult;

use lber::common::TagClass;
use lber::structures::{Boolean, ExplicitTag, OctetString, Sequence, Tag};

use crate::result::{LdapError, Result};

/// Parse a filter string into its BER representation.
pub fn parse(input: &str) -> Result<Tag> {
    match filtexpr(input.as_bytes()) {
        Ok((r, t)) if r.is_empty() => Ok(t),
        _ => Err(LdapError::FilterParsing),
    }
}

fn filtexpr(i: &[u8]) -> IResult<&[u8], Tag> {
    alt((filter, item))(i)
}

fn filter(i: &[u8]) -> IResult<&[u8], Tag> {
    delimited(char('('), filtercomp, char(')'))(i)
}

fn filtercomp(i: &[u8]) -> IResult<&[u8], Tag> {
    alt((and, or, not, item))(i)
}

fn filterlist(i: &[u8]) -> IResult<&[u8], Vec<Tag>> {
    many1(filter)(i)
}

fn and(i: &[u8]) -> IResult<&[u8], Tag> {
    map(preceded(char('&'), filterlist), |tagv| {
        Tag::Sequence(Sequence {
            class: TagClass::Context,
            id: 0,
            inner: tagv,
        })
    })(i)
}

fn or(i: &[u8]) -> IResult<&[u8], Tag> {
    map(preceded(char('|'), filterlist), |tagv| {
        Tag::Sequence(Sequence {
            class: TagClass::Context,
            id: 1,
            inner: tagv,
        })
    })(i)
}

fn not(i: &[u8]) -> IResult<&[u8], Tag> {
    map(preceded(char('!'), filter), |tag| {
        Tag::ExplicitTag(ExplicitTag {
            class: TagClass::Context,
            id: 2,
            inner: Box::new(tag),
        })
    })(i)
}

fn item(i: &[u8]) -> IResult<&[u8], Tag> {
    alt((non_extensible, extensible))(i)
}

const EQ_MATCH: u64 = 3;

fn non_extensible(i: &[u8]) -> IResult<&[u8], Tag> {
    let (i, attr) = attributedescription(i)?;
    let (i, filtertype) = filtertype(i)?;
    let (i, pieces) = values_with_stars(i)?;
    if filtertype != EQ_MATCH || pieces.len() == 1 {
        // A star is only special in an equality match.
        let value = pieces.join(&b'*');
        Ok((i, simple_tag(attr, filtertype, value)))
    } else if pieces.len() == 2 && pieces[0].is_empty() && pieces[1].is_empty() {
        Ok((i, present_tag(attr)))
    } else if pieces[1..pieces.len() - 1].iter().any(Vec::is_empty) {
        // Adjacent stars make an empty interior substring.
        Err(nom::Err::Error(Error::new(i, ErrorKind::Verify)))
    } else {
        Ok((i, substr_tag(attr, pieces)))
    }
}

/// Star-separated assertion value pieces. `n` pieces mean `n - 1` stars;
/// a value without stars parses as a single piece, possibly empty.
fn values_with_stars(i: &[u8]) -> IResult<&[u8], Vec<Vec<u8>>> {
    let (mut i, first) = value_part(i)?;
    let mut pieces = vec![first];
    while let [b'*', rest @ ..] = i {
        let (next_i, piece) = value_part(rest)?;
        pieces.push(piece);
        i = next_i;
    }
    Ok((i, pieces))
}

/// One piece of an assertion value, with backslash escapes decoded.
fn value_part(i: &[u8]) -> IResult<&[u8], Vec<u8>> {
    let mut out = Vec::new();
    let mut rest = i;
    loop {
        match rest {
            [c, tail @ ..] if is_value_char(*c) => {
                out.push(*c);
                rest = tail;
            }
            [b'\\', hi, lo, tail @ ..] => match (hex_val(*hi), hex_val(*lo)) {
                (Some(hi), Some(lo)) => {
                    out.push(hi << 4 | lo);
                    rest = tail;
                }
                _ => return Err(nom::Err::Error(Error::new(rest, ErrorKind::Escaped))),
            },
            [b'\\', ..] => return Err(nom::Err::Error(Error::new(rest, ErrorKind::Escaped))),
            _ => return Ok((rest, out)),
        }
    }
}

fn is_value_char(c: u8) -> bool {
    c != 0 && c != b'*' && c != b'(' && c != b')' && c != b'\\'
}

fn hex_val(c: u8) -> Option<u8> {
    (c as char).to_digit(16).map(|v| v as u8)
}

fn filtertype(i: &[u8]) -> IResult<&[u8], u64> {
    alt((
        value(5, tag(">=")),
        value(6, tag("<=")),
        value(8, tag("~=")),
        value(EQ_MATCH, char('=')),
    ))(i)
}

fn simple_tag(attr: &[u8], filtertype: u64, value: Vec<u8>) -> Tag {
    Tag::Sequence(Sequence {
        class: TagClass::Context,
        id: filtertype,
        inner: vec![
            Tag::OctetString(OctetString {
                inner: attr.to_vec(),
                ..Default::default()
            }),
            Tag::OctetString(OctetString {
                inner: value,
                ..Default::default()
            }),
        ],
    })
}

fn present_tag(attr: &[u8]) -> Tag {
    Tag::OctetString(OctetString {
        class: TagClass::Context,
        id: 7,
        inner: attr.to_vec(),
    })
}

const SUB_MATCH: u64 = 4;

const SUB_INITIAL: u64 = 0;
const SUB_ANY: u64 = 1;
const SUB_FINAL: u64 = 2;

fn substr_tag(attr: &[u8], pieces: Vec<Vec<u8>>) -> Tag {
    let last = pieces.len() - 1;
    let mut inner = vec![];
    for (ix, piece) in pieces.into_iter().enumerate() {
        if piece.is_empty() {
            continue;
        }
        let id = if ix == 0 {
            SUB_INITIAL
        } else if ix == last {
            SUB_FINAL
        } else {
            SUB_ANY
        };
        inner.push(Tag::OctetString(OctetString {
            class: TagClass::Context,
            id,
            inner: piece,
        }));
    }
    Tag::Sequence(Sequence {
        class: TagClass::Context,
        id: SUB_MATCH,
        inner: vec![
            Tag::OctetString(OctetString {
                inner: attr.to_vec(),
                ..Default::default()
            }),
            Tag::Sequence(Sequence {
                inner,
                ..Default::default()
            }),
        ],
    })
}

fn extensible(i: &[u8]) -> IResult<&[u8], Tag> {
    alt((attr_dn_mrule, dn_mrule))(i)
}

fn attr_dn_mrule(i: &[u8]) -> IResult<&[u8], Tag> {
    let (i, attr) = attributedescription(i)?;
    let (i, dn) = opt(tag(":dn"))(i)?;
    let (i, mrule) = opt(preceded(char(':'), attributetype))(i)?;
    let (i, _) = tag(":=")(i)?;
    let (i, value) = value_part(i)?;
    Ok((i, extensible_tag(mrule, Some(attr), value, dn.is_some())))
}

fn dn_mrule(i: &[u8]) -> IResult<&[u8], Tag> {
    let (i, dn) = opt(tag(":dn"))(i)?;
    let (i, mrule) = preceded(char(':'), attributetype)(i)?;
    let (i, _) = tag(":=")(i)?;
    let (i, value) = value_part(i)?;
    Ok((i, extensible_tag(Some(mrule), None, value, dn.is_some())))
}

fn extensible_tag(mrule: Option<&[u8]>, attr: Option<&[u8]>, value: Vec<u8>, dn: bool) -> Tag {
    let mut inner = vec![];
    if let Some(mrule) = mrule {
        inner.push(Tag::OctetString(OctetString {
            class: TagClass::Context,
            id: 1,
            inner: mrule.to_vec(),
        }));
    }
    if let Some(attr) = attr {
        inner.push(Tag::OctetString(OctetString {
            class: TagClass::Context,
            id: 2,
            inner: attr.to_vec(),
        }));
    }
    inner.push(Tag::OctetString(OctetString {
        class: TagClass::Context,
        id: 3,
        inner: value,
    }));
    if dn {
        inner.push(Tag::Boolean(Boolean {
            class: TagClass::Context,
            id: 4,
            inner: dn,
        }));
    }
    Tag::Sequence(Sequence {
        class: TagClass::Context,
        id: 9,
        inner,
    })
}

fn attributedescription(i: &[u8]) -> IResult<&[u8], &[u8]> {
    recognize(pair(
        attributetype,
        many0(preceded(char(';'), take_while1(is_alnum_hyphen))),
    ))(i)
}

fn attributetype(i: &[u8]) -> IResult<&[u8], &[u8]> {
    alt((numericoid, descr))(i)
}

fn numericoid(i: &[u8]) -> IResult<&[u8], &[u8]> {
    recognize(pair(number, many0(preceded(char('.'), number))))(i)
}

fn number(i: &[u8]) -> IResult<&[u8], &[u8]> {
    verify(digit1, |d: &[u8]| d.len() == 1 || d[0] != b'0')(i)
}

fn descr(i: &[u8]) -> IResult<&[u8], &[u8]> {
    recognize(pair(
        take_while_m_n(1, 1, |c: u8| c.is_ascii_alphabetic()),
        take_while(is_alnum_hyphen),
    ))(i)
}

fn is_alnum_hyphen(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'-'
}
