//! Per-connection table of requests awaiting replies.

use std::collections::HashMap;

use ofp_wire::{Message, OfpMessage};

use crate::multipart::{Collected, MultipartCollector};
use crate::request::{PendingRequest, Reply, RequestError};
use crate::xid::Xid;

pub(crate) enum Correlation {
    /// The request is finished; complete it outside the table lock.
    Ready(Box<dyn PendingRequest>, Result<Reply, RequestError>),
    /// A multipart fragment was stored and more are expected.
    Accumulating(usize),
    /// No request is waiting for this xid.
    Miss(OfpMessage),
}

#[derive(Default)]
pub(crate) struct OutstandingRequests {
    pending: HashMap<Xid, Box<dyn PendingRequest>>,
    multipart: MultipartCollector,
    closed: Option<RequestError>,
}

impl OutstandingRequests {
    /// Track `request` under `xid`. On failure the request is handed back
    /// with the error it must be completed with.
    pub(crate) fn register(
        &mut self,
        xid: Xid,
        request: Box<dyn PendingRequest>,
    ) -> Result<(), (Box<dyn PendingRequest>, RequestError)> {
        if let Some(cause) = &self.closed {
            return Err((request, cause.clone()));
        }
        if self.pending.contains_key(&xid) {
            return Err((request, RequestError::DuplicateXid(xid)));
        }
        self.pending.insert(xid, request);
        Ok(())
    }

    pub(crate) fn remove(&mut self, xid: Xid) -> Option<Box<dyn PendingRequest>> {
        self.multipart.discard(xid);
        self.pending.remove(&xid)
    }

    pub(crate) fn correlate(&mut self, message: OfpMessage) -> Correlation {
        let xid = Xid(message.xid);
        if !self.pending.contains_key(&xid) {
            return Correlation::Miss(message);
        }
        let outcome = match message.body {
            Message::MultipartReply(fragment) => match self.multipart.push(xid, fragment) {
                Collected::Incomplete(count) => return Correlation::Accumulating(count),
                Collected::Complete(fragments) => Ok(Reply::Multipart(fragments)),
            },
            Message::Error(err) => Err(RequestError::Device {
                err_type: err.err_type,
                code: err.code,
            }),
            body => Ok(Reply::Single(OfpMessage::new(
                message.version,
                message.xid,
                body,
            ))),
        };
        // Any final reply ends the request, including a partial multipart one.
        self.multipart.discard(xid);
        match self.pending.remove(&xid) {
            Some(request) => Correlation::Ready(request, outcome),
            None => Correlation::Accumulating(0),
        }
    }

    /// Refuse further registrations and hand back every pending request.
    pub(crate) fn fail_all(&mut self, cause: RequestError) -> Vec<Box<dyn PendingRequest>> {
        self.closed.get_or_insert(cause);
        self.multipart.clear();
        self.pending.drain().map(|(_, request)| request).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }

    #[cfg(test)]
    fn partial_multipart(&self) -> usize {
        self.multipart.pending()
    }
}
