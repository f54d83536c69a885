//! Fixed-content injection for event streams.
//!
//! The injector forwards lines until the first increment whose finish reason is
//! `stop`. That line is withheld; the synthetic trailer event (when a trailer is
//! configured) goes out first, then the withheld line, then the sentinel. No
//! further upstream input is consumed once the stop line has been seen.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use uuid::Uuid;

use crate::model::TrailerChunk;
use crate::transcode::{DecodedIncrement, DATA_PREFIX, DONE_SENTINEL};

/// Source of `id`/`created` values for synthesized events.
pub trait StampSource: Send + Sync {
    fn next_id(&self) -> String;
    fn now_secs(&self) -> i64;
}

/// Random v4 ids and wall-clock seconds.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemStamps;

impl StampSource for SystemStamps {
    fn next_id(&self) -> String {
        format!("chatcmpl-{}", Uuid::new_v4().simple())
    }

    fn now_secs(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectorPhase {
    Forwarding,
    /// Stop line held back; transient within a single `accept`.
    Withholding,
    /// Only the sentinel remains to be sent.
    Draining,
    Finished,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct InjectionState {
    pub pending_stop_line: Option<String>,
    pub trailer_sent: bool,
}

pub struct FixedContentInjector {
    trailer: String,
    stamps: Arc<dyn StampSource>,
    phase: InjectorPhase,
    state: InjectionState,
}

impl FixedContentInjector {
    pub fn new(trailer: impl Into<String>, stamps: Arc<dyn StampSource>) -> Self {
        Self {
            trailer: trailer.into(),
            stamps,
            phase: InjectorPhase::Forwarding,
            state: InjectionState::default(),
        }
    }

    pub fn phase(&self) -> InjectorPhase {
        self.phase
    }

    pub fn state(&self) -> &InjectionState {
        &self.state
    }

    /// True once upstream input must no longer be read.
    pub fn is_draining(&self) -> bool {
        matches!(self.phase, InjectorPhase::Draining | InjectorPhase::Finished)
    }

    /// Feed one accepted line with its increment; returns the lines to forward, in order.
    pub fn accept(&mut self, line: String, inc: &DecodedIncrement) -> Vec<String> {
        if self.phase != InjectorPhase::Forwarding {
            return Vec::new();
        }
        if !inc.is_stop() {
            return vec![line];
        }

        self.phase = InjectorPhase::Withholding;
        self.state.pending_stop_line = Some(line);

        let mut out = Vec::with_capacity(2);
        if !self.trailer.is_empty()
            && let Some(ev) = self.trailer_event()
        {
            out.push(ev);
            self.state.trailer_sent = true;
        }
        if let Some(stop) = self.state.pending_stop_line.take() {
            out.push(stop);
        }
        self.phase = InjectorPhase::Draining;
        out
    }

    /// Close the stream: yields the sentinel exactly once.
    pub fn finish(&mut self) -> Option<String> {
        match self.phase {
            InjectorPhase::Finished => None,
            _ => {
                self.phase = InjectorPhase::Finished;
                Some(DONE_SENTINEL.to_string())
            }
        }
    }

    fn trailer_event(&self) -> Option<String> {
        let chunk = TrailerChunk::new(self.stamps.next_id(), self.stamps.now_secs(), &self.trailer);
        match serde_json::to_string(&chunk) {
            Ok(json) => Some(format!("{DATA_PREFIX}{json}")),
            Err(e) => {
                tracing::error!(error = %e, "failed to encode fixed content event");
                None
            }
        }
    }
}

/// Final shape of a line on the wire: the sentinel is cut to its literal
/// form and a trailing `\r` is dropped from everything else.
pub fn normalize_outgoing(mut line: String) -> String {
    if line.starts_with(DONE_SENTINEL) {
        line.truncate(DONE_SENTINEL.len());
        return line;
    }
    if line.ends_with('\r') {
        line.pop();
    }
    line
}
