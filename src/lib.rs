//! A pollable LDAP client engine for Tokio.
//!
//! The crate splits every operation into two halves: a non-blocking
//! *dispatch*, which validates the request, hands it to the connection
//! driver and returns a message ID, and a non-blocking *poll*, which
//! retrieves whatever responses have arrived for that ID. Nothing in the
//! public surface waits on the network; scheduling repeated polls, and
//! deciding when to give up on an operation, belongs to the caller.
//!
//! A connection consists of a driver ([`LdapConnAsync`]), which solely
//! owns the transport and must be spawned onto a Tokio executor, and a
//! cloneable handle ([`Ldap`]), through which operations are dispatched
//! and polled. The [`LdapConn`] facade bundles both with a private
//! runtime for use outside of async code, and adds blocking convenience
//! calls driven by an internal polling loop.
//!
//! Supported operations are simple Bind, Search, Compare and Modify,
//! plus Abandon and Unbind for terminating operations and the session.
//! Only the `ldap` URL scheme (plain TCP) is accepted.
//!
//! ```rust,no_run
//! use ldap_poll::{LdapConn, Scope};
//!
//! fn main() -> ldap_poll::Result<()> {
//!     let mut conn = LdapConn::new("ldap://localhost:389")?;
//!     conn.simple_bind("cn=admin,dc=example,dc=com", "secret")?;
//!     let (entries, _res) = conn.search(
//!         "ou=People,dc=example,dc=com",
//!         Scope::Subtree,
//!         "(objectClass=inetOrgPerson)",
//!         vec!["cn", "mail"],
//!     )?;
//!     for entry in entries {
//!         println!("{}", entry.dn);
//!     }
//!     conn.unbind()?;
//!     Ok(())
//! }
//! ```

mod abandon;
mod bind;
mod compare;
mod conn;
pub mod controls;
mod filter;
mod ldap;
mod modify;
mod poll;
mod protocol;
mod result;
mod search;
#[cfg(feature = "sync")]
mod sync;
mod unbind;
mod util;

pub use conn::LdapConnAsync;
pub use ldap::{ConnState, Ldap, OpKind, RequestId};
pub use modify::Mod;
pub use poll::PollOutcome;
pub use result::{
    map_status, result_code_name, ErrorKind, ErrorRecord, LdapError, LdapResult, Result,
};
pub use search::{DerefAliases, ResultEntry, Scope, SearchEntry, SearchOptions};
#[cfg(feature = "sync")]
pub use sync::{LdapConn, DEFAULT_OP_TIMEOUT};
pub use util::{dn_escape, ldap_escape};

pub use lber;

/// Spawn the connection driver on the active Tokio executor.
///
/// A transport error terminating the driver is logged at warn level;
/// outstanding operations observe it as an end of stream when polled.
#[macro_export]
macro_rules! drive {
    ($conn:expr) => {
        tokio::spawn(async move {
            if let Err(e) = $conn.drive().await {
                log::warn!("LDAP connection error: {}", e);
            }
        });
    };
}
