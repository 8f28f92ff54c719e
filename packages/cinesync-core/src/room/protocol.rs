//! Wire protocol between clients and the room coordinator.
//!
//! Events travel as named JSON envelopes of the form
//! `{"event": "<name>", "data": {...}}` over whichever gateway transport the
//! client negotiated (WebSocket or long-poll). Event names mirror the browser
//! client: host-originated playback events carry a `host:` prefix, server
//! broadcasts a `server:` prefix.

use serde::{Deserialize, Serialize};

use crate::store::PlaybackState;

/// Events sent by a client to the coordinator.
#[derive(Debug, Clone, Deserialize)]
#[cfg_attr(test, derive(Serialize))]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    /// Join (or re-join) a room under a display name.
    #[serde(rename = "join-room", rename_all = "camelCase")]
    JoinRoom {
        room_id: String,
        display_name: String,
    },

    /// Post a chat message to the joined room.
    #[serde(rename = "chat-message")]
    ChatMessage { body: String },

    /// Host resumed playback at `time` seconds.
    #[serde(rename = "host:play")]
    HostPlay { time: f64 },

    /// Host paused playback at `time` seconds.
    #[serde(rename = "host:pause")]
    HostPause { time: f64 },

    /// Host seeked to `time` seconds.
    #[serde(rename = "host:seek")]
    HostSeek { time: f64 },

    /// Host loaded a different video. An empty `url` clears the video.
    #[serde(rename = "host:change-video")]
    HostChangeVideo {
        url: String,
        #[serde(default)]
        title: Option<String>,
    },

    /// Host answered a `server:request-host-time` probe.
    #[serde(rename = "host:report-time")]
    HostReportTime { time: f64 },

    /// Follower asks for a fresh state snapshot (e.g. after a sync-idle
    /// window with no `server:sync-time`).
    #[serde(rename = "client:request-sync")]
    RequestSync,

    /// Any member asks for the current member roster.
    #[serde(rename = "request-user-list")]
    RequestUserList,
}

impl ClientEvent {
    /// Whether the event mutates playback state and therefore requires the
    /// sender to be the live host.
    #[must_use]
    pub fn is_host_only(&self) -> bool {
        matches!(
            self,
            Self::HostPlay { .. }
                | Self::HostPause { .. }
                | Self::HostSeek { .. }
                | Self::HostChangeVideo { .. }
                | Self::HostReportTime { .. }
        )
    }

    /// Event name as it appears on the wire, for logging.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::JoinRoom { .. } => "join-room",
            Self::ChatMessage { .. } => "chat-message",
            Self::HostPlay { .. } => "host:play",
            Self::HostPause { .. } => "host:pause",
            Self::HostSeek { .. } => "host:seek",
            Self::HostChangeVideo { .. } => "host:change-video",
            Self::HostReportTime { .. } => "host:report-time",
            Self::RequestSync => "client:request-sync",
            Self::RequestUserList => "request-user-list",
        }
    }
}

/// One entry of the `user-list-updated` roster.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserEntry {
    pub display_name: String,
    pub is_host: bool,
}

/// Events emitted by the coordinator to clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    /// Tells the joiner whether it is the host. Always the first event a
    /// joiner receives, strictly before `sync-state`.
    #[serde(rename = "host-assigned", rename_all = "camelCase")]
    HostAssigned { is_host: bool },

    /// Full playback snapshot for one session.
    #[serde(rename = "sync-state", rename_all = "camelCase")]
    SyncState {
        url: Option<String>,
        title: Option<String>,
        time: f64,
        state: PlaybackState,
        /// Follower-side drift threshold in seconds.
        drift_threshold: f64,
    },

    #[serde(rename = "server:play")]
    Play { time: f64 },

    #[serde(rename = "server:pause")]
    Pause { time: f64 },

    #[serde(rename = "server:seek")]
    Seek { time: f64 },

    #[serde(rename = "server:change-video")]
    ChangeVideo {
        url: Option<String>,
        title: Option<String>,
    },

    /// Host-reported clock, broadcast so followers can correct drift.
    #[serde(rename = "server:sync-time")]
    SyncTime { time: f64 },

    /// Asks the current host to report its clock.
    #[serde(rename = "server:request-host-time")]
    RequestHostTime,

    #[serde(rename = "user-joined", rename_all = "camelCase")]
    UserJoined { display_name: String },

    #[serde(rename = "user-left", rename_all = "camelCase")]
    UserLeft { display_name: String },

    #[serde(rename = "user-list-updated")]
    UserListUpdated { users: Vec<UserEntry> },

    #[serde(rename = "new-chat-message", rename_all = "camelCase")]
    NewChatMessage {
        author: String,
        body: String,
        timestamp: u64,
    },

    #[serde(rename = "error")]
    Error { message: String },
}

impl ServerEvent {
    /// Serializes the event to its wire form. Serialization of these types
    /// cannot fail in practice; a `None` here indicates a programming error
    /// and is logged at the call site.
    #[must_use]
    pub fn to_json(&self) -> Option<String> {
        serde_json::to_string(self).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_events_deserialize_from_wire_names() {
        let join: ClientEvent = serde_json::from_str(
            r#"{"event":"join-room","data":{"roomId":"ABC234","displayName":"Alice"}}"#,
        )
        .unwrap();
        match join {
            ClientEvent::JoinRoom {
                room_id,
                display_name,
            } => {
                assert_eq!(room_id, "ABC234");
                assert_eq!(display_name, "Alice");
            }
            other => panic!("wrong variant: {other:?}"),
        }

        let play: ClientEvent =
            serde_json::from_str(r#"{"event":"host:play","data":{"time":12.5}}"#).unwrap();
        assert!(matches!(play, ClientEvent::HostPlay { time } if time == 12.5));

        // Unit variants need no data field
        let sync: ClientEvent = serde_json::from_str(r#"{"event":"client:request-sync"}"#).unwrap();
        assert!(matches!(sync, ClientEvent::RequestSync));
    }

    #[test]
    fn change_video_title_is_optional() {
        let ev: ClientEvent =
            serde_json::from_str(r#"{"event":"host:change-video","data":{"url":"u"}}"#).unwrap();
        assert!(matches!(
            ev,
            ClientEvent::HostChangeVideo { ref url, ref title } if url == "u" && title.is_none()
        ));
    }

    #[test]
    fn host_only_classification() {
        let host_only = [
            r#"{"event":"host:play","data":{"time":0}}"#,
            r#"{"event":"host:pause","data":{"time":0}}"#,
            r#"{"event":"host:seek","data":{"time":0}}"#,
            r#"{"event":"host:change-video","data":{"url":"u"}}"#,
            r#"{"event":"host:report-time","data":{"time":0}}"#,
        ];
        for raw in host_only {
            let ev: ClientEvent = serde_json::from_str(raw).unwrap();
            assert!(ev.is_host_only(), "{raw} should be host-only");
        }

        let anyone: ClientEvent = serde_json::from_str(r#"{"event":"client:request-sync"}"#).unwrap();
        assert!(!anyone.is_host_only());
    }

    #[test]
    fn server_events_serialize_to_wire_names() {
        let assigned = ServerEvent::HostAssigned { is_host: true };
        let json: serde_json::Value = serde_json::from_str(&assigned.to_json().unwrap()).unwrap();
        assert_eq!(json["event"], "host-assigned");
        assert_eq!(json["data"]["isHost"], true);

        let sync = ServerEvent::SyncState {
            url: None,
            title: None,
            time: 0.0,
            state: PlaybackState::Paused,
            drift_threshold: 1.5,
        };
        let json: serde_json::Value = serde_json::from_str(&sync.to_json().unwrap()).unwrap();
        assert_eq!(json["event"], "sync-state");
        assert_eq!(json["data"]["state"], "paused");
        assert!(json["data"]["url"].is_null());

        let probe = ServerEvent::RequestHostTime;
        let json: serde_json::Value = serde_json::from_str(&probe.to_json().unwrap()).unwrap();
        assert_eq!(json["event"], "server:request-host-time");
    }

    #[test]
    fn roster_serializes_camel_case() {
        let ev = ServerEvent::UserListUpdated {
            users: vec![UserEntry {
                display_name: "Alice".into(),
                is_host: true,
            }],
        };
        let json: serde_json::Value = serde_json::from_str(&ev.to_json().unwrap()).unwrap();
        assert_eq!(json["data"]["users"][0]["displayName"], "Alice");
        assert_eq!(json["data"]["users"][0]["isHost"], true);
    }
}
