//! Inbound frame routing.
//!
//! Frames are handled one at a time in arrival order. Replies go to the
//! [`Correlator`]; `update` and `remove` pushes are applied to the
//! [`SyncState`]; out-of-band errors are handed back to the caller.

use parking_lot::Mutex;
use serde_json::Value;
use tagsync_core::{Inbound, is_authorization_error};
use tracing::{debug, trace, warn};

use crate::cache::SyncState;
use crate::correlator::Correlator;

/// What handling one frame did.
#[derive(Clone, Debug, PartialEq)]
pub enum Dispatched {
    /// A reply; `resolved` is false when nothing was waiting for it.
    Reply {
        /// Whether a pending request took the reply.
        resolved: bool,
    },
    /// A push changed the cache or label membership.
    Changed,
    /// A push that did not affect anything the caller is subscribed to.
    Unchanged,
    /// An unsolicited error.
    ServerError {
        /// The error payload as sent.
        payload: Value,
        /// Whether it signals lost authorization.
        authorization: bool,
    },
    /// The frame could not be classified.
    Malformed,
}

/// Route one inbound text frame.
pub fn dispatch(text: &str, correlator: &Correlator, state: &Mutex<SyncState>) -> Dispatched {
    let inbound = match Inbound::parse(text) {
        Ok(inbound) => inbound,
        Err(e) => {
            warn!(error = %e, "ignoring malformed frame");
            return Dispatched::Malformed;
        }
    };

    match inbound {
        Inbound::Reply {
            correlation_id,
            outcome,
        } => {
            let resolved = correlator.resolve(&correlation_id, outcome);
            if !resolved {
                debug!(correlation_id = %correlation_id, "reply for unknown request");
            }
            Dispatched::Reply { resolved }
        }
        Inbound::Update(object) => {
            let outcome = state.lock().install(object);
            trace!(?outcome, "update push");
            if outcome.changed() {
                Dispatched::Changed
            } else {
                Dispatched::Unchanged
            }
        }
        Inbound::Remove(target) => {
            if state.lock().remove(target) {
                Dispatched::Changed
            } else {
                Dispatched::Unchanged
            }
        }
        Inbound::Error(payload) => {
            let authorization = is_authorization_error(&payload);
            warn!(%payload, authorization, "server error push");
            Dispatched::ServerError {
                payload,
                authorization,
            }
        }
    }
}
