// ABOUTME: Per-connection session state for the HTSP client
// ABOUTME: Tracks handshake results, feature flags and the channel-name fallback cache

use std::collections::HashMap;

/// Minimum `htspversion` this client accepts from a `hello` response.
pub const MIN_HTSP_VERSION: i64 = 8;
/// `htspversion` at which the server supports `getChannel` directly.
pub const CHANNEL_GET_MIN_VERSION: i64 = 14;
/// `htspversion` at which the server supports transcoded subscriptions.
pub const TRANSCODING_MIN_VERSION: i64 = 11;
/// `htspversion` this client advertises in its own `hello`.
pub const CLIENT_HTSP_VERSION: i64 = 25;
pub const CLIENT_NAME: &str = "mp.tvheadend";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Connecting,
    Ready,
    Authenticated,
    LostConnection,
}

/// Session state, mutated only while the client's session-establishment
/// lock (or the reader task, for `lost_connection`) holds it.
#[derive(Debug)]
pub struct Session {
    pub phase: SessionPhase,
    pub server_name: Option<String>,
    pub server_version: Option<String>,
    pub htspversion: Option<i64>,
    pub channel_get_supported: bool,
    pub transcoding_supported: bool,
    pub seq: i64,
    /// Only authoritative when `channel_get_supported` is false.
    pub channel_cache: HashMap<i64, String>,
}

impl Default for Session {
    fn default() -> Session {
        Session {
            phase: SessionPhase::Idle,
            server_name: None,
            server_version: None,
            htspversion: None,
            channel_get_supported: false,
            transcoding_supported: false,
            seq: 0,
            channel_cache: HashMap::new(),
        }
    }
}

impl Session {
    pub fn is_authenticated(&self) -> bool {
        self.phase == SessionPhase::Authenticated
    }

    /// Resets to a fresh pre-handshake state: reconnecting starts `seq`
    /// back at 0 and drops the channel cache (invariant on reconnect).
    pub fn reset_for_reconnect(&mut self) {
        *self = Session::default();
        self.phase = SessionPhase::Connecting;
    }

    /// Allocates the next `seq`, wrapping strictly above 32768 as invariant
    /// 2 requires.
    pub fn next_seq(&mut self) -> i64 {
        let seq = self.seq;
        self.seq = (self.seq + 1) % 32769;
        seq
    }

    pub fn note_hello(&mut self, htspversion: i64, server_name: String, server_version: String) {
        self.htspversion = Some(htspversion);
        self.server_name = Some(server_name);
        self.server_version = Some(server_version);
        self.channel_get_supported = htspversion >= CHANNEL_GET_MIN_VERSION;
        self.transcoding_supported = htspversion >= TRANSCODING_MIN_VERSION;
        self.phase = SessionPhase::Ready;
    }
}
