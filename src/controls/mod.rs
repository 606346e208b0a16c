//! Request and response controls.
//!
//! A control is a triple of OID, criticality, and an optional BER-encoded
//! value. Requests carry [`RawControl`] instances, validated and
//! serialized by [`build_controls`] before dispatch; responses yield
//! [`Control`] instances, where a recognized OID is additionally tagged
//! with its [`ControlType`] so the typed parser can be chosen without
//! string matching at the call site.

use std::collections::HashMap;

use lazy_static::lazy_static;

use lber::structure::{StructureTag, PL};
use lber::structures::{ASNTag, Boolean, OctetString, Sequence, Tag};
use lber::universal::Types;

use crate::result::{LdapError, Result};

pub mod types {
    //! Control type enum and variant names.
    pub type ControlType = self::inner::_ControlType;
    pub use self::inner::_ControlType::PagedResults;
    mod inner {
        #[derive(Clone, Copy, Debug, PartialEq, Eq)]
        pub enum _ControlType {
            PagedResults,
            #[doc(hidden)]
            _Nonexhaustive,
        }
    }
}
use self::types::ControlType;

mod paged_results;
pub use self::paged_results::{PagedResults, PAGED_RESULTS_OID};

lazy_static! {
    static ref CONTROLS: HashMap<&'static str, ControlType> = {
        let mut map = HashMap::new();
        map.insert(PAGED_RESULTS_OID, types::PagedResults);
        map
    };
}

/// Mark a control as critical.
///
/// Controls provided by this crate implement this trait. All controls
/// are instantiated as non-critical; chaining `critical()` onto the
/// instance flips the flag in the serialized form.
pub trait MakeCritical {
    fn critical(self) -> CriticalControl<Self>
    where
        Self: Sized,
    {
        CriticalControl { control: self }
    }
}

/// Wrapper for a control marked as critical. Intended to be ephemeral;
/// it converts into a [`RawControl`] with the criticality bit set.
pub struct CriticalControl<T> {
    control: T,
}

impl<T> From<CriticalControl<T>> for RawControl
where
    T: Into<RawControl>,
{
    fn from(cc: CriticalControl<T>) -> RawControl {
        let mut raw = cc.control.into();
        raw.crit = true;
        raw
    }
}

/// Conversion of a control value from its BER payload.
pub trait ControlParser {
    fn parse(val: &[u8]) -> Self;
}

/// Parse the raw value bytes into a control instance of the given type.
pub fn parse_control<T: ControlParser>(val: &[u8]) -> T {
    T::parse(val)
}

/// Response control, comprised of the recognized control type, if any,
/// and the raw content of the control.
#[derive(Clone, Debug)]
pub struct Control(pub Option<ControlType>, pub RawControl);

/// Conveniently packaged control triple, the directly usable form of a
/// request or response control.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawControl {
    /// OID of the control.
    pub ctype: String,
    /// Criticality; a critical control the server doesn't recognize
    /// makes it fail the operation.
    pub crit: bool,
    /// Control value, already BER-encoded where one exists.
    pub val: Option<Vec<u8>>,
}

impl From<RawControl> for StructureTag {
    fn from(ctrl: RawControl) -> StructureTag {
        construct_control(&ctrl.ctype, ctrl.crit, ctrl.val)
    }
}

/// Validate and serialize request controls for inclusion in an envelope.
///
/// Every OID is checked for well-formedness first; a malformed OID fails
/// the whole set without sending anything.
pub fn build_controls(ctrls: &[RawControl]) -> Result<Vec<StructureTag>> {
    let mut out = Vec::with_capacity(ctrls.len());
    for ctrl in ctrls {
        if !valid_oid(&ctrl.ctype) {
            return Err(LdapError::InvalidOid(ctrl.ctype.clone()));
        }
        out.push(construct_control(&ctrl.ctype, ctrl.crit, ctrl.val.clone()));
    }
    Ok(out)
}

/// Dotted-decimal OID: at least two arcs, no empty or zero-padded
/// components, first arc 0, 1 or 2.
fn valid_oid(oid: &str) -> bool {
    let mut arcs = 0;
    for comp in oid.split('.') {
        if comp.is_empty() || !comp.bytes().all(|b| b.is_ascii_digit()) {
            return false;
        }
        if comp.len() > 1 && comp.starts_with('0') {
            return false;
        }
        if arcs == 0 && !matches!(comp, "0" | "1" | "2") {
            return false;
        }
        arcs += 1;
    }
    arcs >= 2
}

/// Serialize a control triple. The criticality component is omitted when
/// false and the value component when absent, per the encoding rules for
/// DEFAULT and OPTIONAL components.
pub fn construct_control(oid: &str, crit: bool, val: Option<Vec<u8>>) -> StructureTag {
    let mut seq = vec![Tag::OctetString(OctetString {
        inner: Vec::from(oid.as_bytes()),
        ..Default::default()
    })];
    if crit {
        seq.push(Tag::Boolean(Boolean {
            inner: true,
            ..Default::default()
        }));
    }
    if let Some(val) = val {
        seq.push(Tag::OctetString(OctetString {
            inner: val,
            ..Default::default()
        }));
    }
    Tag::Sequence(Sequence {
        inner: seq,
        ..Default::default()
    })
    .into_structure()
}

/// Parse the controls of a response envelope.
///
/// __Note__: panics on structurally malformed controls, like the other
/// response parsers.
pub fn parse_controls(t: StructureTag) -> Vec<Control> {
    let tags = t.expect_constructed().expect("control sequence").into_iter();
    let mut ctrls = Vec::new();
    for ctrl in tags {
        let mut components = ctrl.expect_constructed().expect("components").into_iter();
        let ctype = String::from_utf8(
            components
                .next()
                .expect("element")
                .expect_primitive()
                .expect("octet string"),
        )
        .expect("control type");
        let next = components.next();
        let (crit, maybe_val) = match next {
            None => (false, None),
            Some(c) => match c {
                StructureTag { id, ref payload, .. } if id == Types::Boolean as u64 => {
                    match *payload {
                        PL::P(ref v) => (v[0] != 0, components.next()),
                        PL::C(_) => panic!("decoding error"),
                    }
                }
                StructureTag { id, .. } if id == Types::OctetString as u64 => {
                    (false, Some(c))
                }
                _ => panic!("decoding error"),
            },
        };
        let val = maybe_val.map(|v| v.expect_primitive().expect("octet string"));
        let known_type = CONTROLS.get(&*ctype).copied();
        ctrls.push(Control(known_type, RawControl { ctype, crit, val }));
    }
    ctrls
}

#[cfg(test)]
mod test {
    use super::*;

    fn raw(oid: &str) -> RawControl {
        RawControl {
            ctype: oid.to_owned(),
            crit: false,
            val: None,
        }
    }

    #[test]
    fn oid_validation() {
        for good in ["1.2.840.113556.1.4.319", "2.16.840.1.113730.3.4.2", "0.9"] {
            assert!(valid_oid(good), "rejected {}", good);
        }
        for bad in ["", "1", "3.2.1", "1..2", "1.02", "1.2a", ".1.2", "1.2."] {
            assert!(!valid_oid(bad), "accepted {}", bad);
        }
    }

    #[test]
    fn malformed_oid_fails_the_whole_set() {
        let err = build_controls(&[raw("1.2.3"), raw("not-an-oid")]).expect_err("build");
        assert!(matches!(err, LdapError::InvalidOid(s) if s == "not-an-oid"));
    }

    #[test]
    fn control_round_trip() {
        let reqs = vec![
            RawControl {
                ctype: "1.3.6.1.4.1.4203.1.10.1".to_owned(),
                crit: true,
                val: None,
            },
            RawControl {
                ctype: "1.2.840.113556.1.4.319".to_owned(),
                crit: false,
                val: Some(vec![0x30, 0x05, 0x02, 0x01, 0x0a, 0x04, 0x00]),
            },
        ];
        let built = build_controls(&reqs).expect("build");
        let envelope = StructureTag {
            class: lber::common::TagClass::Context,
            id: 0,
            payload: PL::C(built),
        };
        let parsed = parse_controls(envelope);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].1, reqs[0]);
        assert_eq!(parsed[1].1, reqs[1]);
        assert!(parsed[0].0.is_none());
        assert!(matches!(parsed[1].0, Some(types::PagedResults)));
    }
}
