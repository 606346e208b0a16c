//! Connection establishment and the connection driver.
//!
//! The driver is the single owner of the transport. Operation handles
//! never touch the socket: they queue request messages over a channel,
//! and the driver writes them out and routes each incoming envelope to
//! the operation with the matching message ID. Completions of different
//! operations may therefore arrive in any order without confusing their
//! callers.

use std::collections::HashMap;

use futures::{SinkExt, StreamExt};
use log::debug;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use url::Url;

use lber::structure::StructureTag;
use lber::structures::Tag;

use crate::controls::Control;
use crate::ldap::{Ldap, RequestId};
use crate::protocol::{LdapCodec, MaybeControls, ResponseItem};
use crate::result::{LdapError, Result};

/// Messages from operation handles to the driver.
pub(crate) enum RequestMessage {
    /// An operation expecting one or more correlated responses.
    Op {
        id: RequestId,
        tag: Tag,
        controls: MaybeControls,
        tx: mpsc::UnboundedSender<ResponseItem>,
    },
    /// Fire-and-forget PDU with no response (Abandon).
    Solo { id: RequestId, tag: Tag },
    /// Unbind: written out, then the transport is shut down.
    Unbind { id: RequestId, tag: Tag },
}

/// Driver of a single connection to a directory server.
///
/// Returned by [`new()`](#method.new) together with the [`Ldap`] handle
/// used to dispatch operations. Must be spun onto an executor, most
/// conveniently with the [`drive!`](crate::drive) macro; nothing happens
/// on the connection until then.
pub struct LdapConnAsync {
    rx: mpsc::UnboundedReceiver<RequestMessage>,
    stream: Framed<TcpStream, LdapCodec>,
    routes: HashMap<RequestId, mpsc::UnboundedSender<ResponseItem>>,
}

impl LdapConnAsync {
    /// Open a connection to the directory server at `url`.
    ///
    /// Only the `ldap` scheme is accepted; the port defaults to 389.
    /// The protocol version (LDAPv3) is carried in every Bind request,
    /// so nothing is negotiated on the wire at this point; a server
    /// unable to serve v3 rejects the bind instead.
    pub async fn new(url: &str) -> Result<(LdapConnAsync, Ldap)> {
        let url = Url::parse(url)?;
        match url.scheme() {
            "ldap" => (),
            s => return Err(LdapError::UnsupportedScheme(s.to_owned())),
        }
        let host = url.host_str().ok_or(LdapError::MissingHost)?;
        let port = url.port().unwrap_or(389);
        let stream = TcpStream::connect((host, port)).await?;
        debug!("connected to {}:{}", host, port);
        let (tx, rx) = mpsc::unbounded_channel();
        Ok((
            LdapConnAsync {
                rx,
                stream: Framed::new(stream, LdapCodec),
                routes: HashMap::new(),
            },
            Ldap::new(tx),
        ))
    }

    /// Run the connection to completion.
    ///
    /// Terminates cleanly on Unbind or when every operation handle has
    /// been dropped, and with an error on transport failure. In every
    /// case the transport is released here, exactly once, by dropping
    /// the framed stream.
    pub async fn drive(mut self) -> Result<()> {
        let res = self.turn().await;
        // Dropping the routes wakes every outstanding poller with a
        // disconnect instead of leaving it pending forever.
        self.routes.clear();
        res
    }

    async fn turn(&mut self) -> Result<()> {
        loop {
            tokio::select! {
                req = self.rx.recv() => match req {
                    Some(RequestMessage::Op { id, tag, controls, tx }) => {
                        self.routes.insert(id, tx);
                        self.stream.send((id, tag, controls)).await?;
                    },
                    Some(RequestMessage::Solo { id, tag }) => {
                        self.stream.send((id, tag, None)).await?;
                    },
                    Some(RequestMessage::Unbind { id, tag }) => {
                        let _ = self.stream.send((id, tag, None)).await;
                        let _ = self.stream.close().await;
                        debug!("connection closed on unbind");
                        return Ok(());
                    },
                    None => {
                        let _ = self.stream.close().await;
                        debug!("all operation handles dropped, closing");
                        return Ok(());
                    },
                },
                resp = self.stream.next() => match resp {
                    Some(Ok((id, protoop, ctrls))) => self.route(id, protoop, ctrls),
                    Some(Err(e)) => return Err(e),
                    None => return Err(LdapError::EndOfStream),
                },
            }
        }
    }

    fn route(&mut self, id: RequestId, protoop: StructureTag, ctrls: Vec<Control>) {
        // Search entries (4), referrals (19) and intermediate messages
        // (25) are mid-stream; any other op completes the operation.
        let terminal = !matches!(protoop.id, 4 | 19 | 25);
        match self.routes.get(&id) {
            Some(tx) => {
                if tx.send((protoop, ctrls)).is_err() {
                    // Poller went away (abandon or timeout); stop routing.
                    debug!("dropping response for msgid {}: receiver gone", id);
                    self.routes.remove(&id);
                    return;
                }
            }
            None => {
                debug!("discarding response for unroutable msgid {}", id);
                return;
            }
        }
        if terminal {
            self.routes.remove(&id);
        }
    }
}
