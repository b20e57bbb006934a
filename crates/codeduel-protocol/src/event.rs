//! Typed client ↔ core events.
//!
//! Every frame is adjacently tagged:
//!
//! ```json
//! { "event": "queue:join", "data": { "difficulty": "medium" } }
//! ```
//!
//! `#[serde(tag = "event", content = "data")]` produces exactly that shape,
//! and `rename_all_fields = "camelCase"` turns `match_id` into `matchId`
//! inside `data`. Event names are set per variant because they carry a
//! namespace prefix (`queue:`, `match:`) that no rename rule can express.

use serde::{Deserialize, Serialize};

use crate::{
    AbandonReason, IdentityId, MatchOutcome, ProgressMarker, SessionId,
    SessionState, Tier, Verdict, VerdictStatus,
};

/// Label substituted for the opponent's identity in relayed events.
pub const OPPONENT_LABEL: &str = "opponent";

fn default_language() -> String {
    "python".to_string()
}

// ---------------------------------------------------------------------------
// Client → core
// ---------------------------------------------------------------------------

/// Everything a client may send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all_fields = "camelCase")]
pub enum ClientEvent {
    /// Presents a credential. Only valid as the very first frame, and only
    /// when the upgrade URL carried no `token` parameter.
    #[serde(rename = "auth")]
    Auth { token: String },

    /// Enters the matchmaking queue for a tier.
    #[serde(rename = "queue:join")]
    QueueJoin { difficulty: Tier },

    /// Leaves whichever queue the sender is in. The tier is informational.
    #[serde(rename = "queue:leave")]
    QueueLeave {
        #[serde(default)]
        difficulty: Option<Tier>,
    },

    /// Acknowledges a pairing. Idempotent; also used to resume.
    #[serde(rename = "match:join")]
    MatchJoin { match_id: SessionId },

    /// Reports the sender's progress; relayed to the opponent only.
    #[serde(rename = "match:progress")]
    MatchProgress {
        match_id: SessionId,
        marker: ProgressMarker,
    },

    /// Runs code against sample tests. Never completes the match.
    #[serde(rename = "match:run")]
    MatchRun {
        match_id: SessionId,
        code: String,
        #[serde(default = "default_language")]
        language: String,
    },

    /// Submits code against every test. An accepted verdict wins.
    #[serde(rename = "match:submit")]
    MatchSubmit {
        match_id: SessionId,
        code: String,
        #[serde(default = "default_language")]
        language: String,
    },

    /// Keep-alive; answered with [`ServerEvent::Pong`].
    #[serde(rename = "ping")]
    Ping { client_time: u64 },
}

impl ClientEvent {
    /// The wire name of this event, for logs and rejection messages.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Auth { .. } => "auth",
            Self::QueueJoin { .. } => "queue:join",
            Self::QueueLeave { .. } => "queue:leave",
            Self::MatchJoin { .. } => "match:join",
            Self::MatchProgress { .. } => "match:progress",
            Self::MatchRun { .. } => "match:run",
            Self::MatchSubmit { .. } => "match:submit",
            Self::Ping { .. } => "ping",
        }
    }
}

// ---------------------------------------------------------------------------
// Core → client
// ---------------------------------------------------------------------------

/// One participant as seen in a [`SessionSnapshot`]. Carries no identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantView {
    pub joined: bool,
    pub connected: bool,
    #[serde(default)]
    pub progress: Option<ProgressMarker>,
}

/// Full state of a session from one participant's point of view.
///
/// Sent in reply to every `match:join`, which is how a reconnecting client
/// restores its screen. `elapsed_ms` is measured from the scheduled start
/// and is negative while the match is still counting down.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub match_id: SessionId,
    pub difficulty: Tier,
    pub state: SessionState,
    /// Unix milliseconds of the authoritative start instant.
    pub scheduled_start: u64,
    pub elapsed_ms: i64,
    pub you: ParticipantView,
    pub opponent: ParticipantView,
}

/// Everything the core may push to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    /// The channel is authenticated and registered.
    #[serde(rename = "connection:ack")]
    ConnectionAck {
        user_id: IdentityId,
        display_name: String,
        server_time: u64,
    },

    /// A newer connection for the same identity took over; this channel
    /// is about to be closed.
    #[serde(rename = "connection:superseded")]
    ConnectionSuperseded,

    #[serde(rename = "queue:joined")]
    QueueJoined { difficulty: Tier, position: usize },

    #[serde(rename = "queue:left")]
    QueueLeft { difficulty: Option<Tier> },

    /// Two queue entries were paired into a session.
    #[serde(rename = "match:found")]
    MatchFound {
        match_id: SessionId,
        difficulty: Tier,
        /// Unix milliseconds of the authoritative start instant.
        scheduled_start: u64,
        /// Same instant relative to now, for clients with a skewed clock.
        starts_in_ms: u64,
    },

    #[serde(rename = "match:state")]
    MatchState(SessionSnapshot),

    /// Both participants joined; the countdown is authoritative.
    #[serde(rename = "match:started")]
    MatchStarted {
        match_id: SessionId,
        scheduled_start: u64,
    },

    /// The opponent's progress marker, identity scrubbed.
    #[serde(rename = "match:opponentProgress")]
    OpponentProgress {
        match_id: SessionId,
        opponent: String,
        marker: ProgressMarker,
    },

    #[serde(rename = "match:opponentSubmitted")]
    OpponentSubmitted {
        match_id: SessionId,
        status: VerdictStatus,
        passed: u32,
        total: u32,
    },

    /// The sender's own submission verdict.
    #[serde(rename = "match:submission")]
    Submission {
        match_id: SessionId,
        verdict: Verdict,
    },

    #[serde(rename = "match:runResult")]
    RunResult {
        match_id: SessionId,
        verdict: Verdict,
    },

    #[serde(rename = "match:complete")]
    MatchComplete {
        match_id: SessionId,
        verdict: Option<Verdict>,
        result: MatchOutcome,
    },

    #[serde(rename = "match:abandoned")]
    MatchAbandoned {
        match_id: SessionId,
        reason: AbandonReason,
    },

    #[serde(rename = "match:opponentDisconnected")]
    OpponentDisconnected { match_id: SessionId, grace_ms: u64 },

    #[serde(rename = "match:opponentReconnected")]
    OpponentReconnected { match_id: SessionId },

    #[serde(rename = "pong")]
    Pong { client_time: u64, server_time: u64 },

    /// A rejected event. The channel stays open.
    #[serde(rename = "error")]
    Error { code: u16, reason: String },
}

impl ServerEvent {
    /// The session this event belongs to, if any.
    pub fn session_id(&self) -> Option<&SessionId> {
        match self {
            Self::MatchFound { match_id, .. }
            | Self::MatchStarted { match_id, .. }
            | Self::OpponentProgress { match_id, .. }
            | Self::OpponentSubmitted { match_id, .. }
            | Self::Submission { match_id, .. }
            | Self::RunResult { match_id, .. }
            | Self::MatchComplete { match_id, .. }
            | Self::MatchAbandoned { match_id, .. }
            | Self::OpponentDisconnected { match_id, .. }
            | Self::OpponentReconnected { match_id } => Some(match_id),
            Self::MatchState(snapshot) => Some(&snapshot.match_id),
            _ => None,
        }
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    //! The browser client parses these shapes by hand, so each test pins
    //! one event's JSON exactly.

    use super::*;
    use serde_json::json;

    #[test]
    fn test_queue_join_parses_client_frame() {
        let frame = r#"{"event":"queue:join","data":{"difficulty":"medium"}}"#;
        let event: ClientEvent = serde_json::from_str(frame).unwrap();
        assert_eq!(event, ClientEvent::QueueJoin { difficulty: Tier::Medium });
        assert_eq!(event.name(), "queue:join");
    }

    #[test]
    fn test_queue_leave_difficulty_optional() {
        let frame = r#"{"event":"queue:leave","data":{}}"#;
        let event: ClientEvent = serde_json::from_str(frame).unwrap();
        assert_eq!(event, ClientEvent::QueueLeave { difficulty: None });

        let frame = r#"{"event":"queue:leave","data":{"difficulty":"easy"}}"#;
        let event: ClientEvent = serde_json::from_str(frame).unwrap();
        assert_eq!(
            event,
            ClientEvent::QueueLeave {
                difficulty: Some(Tier::Easy)
            }
        );
    }

    #[test]
    fn test_match_join_uses_camel_case_match_id() {
        let frame = r#"{"event":"match:join","data":{"matchId":"9f2c"}}"#;
        let event: ClientEvent = serde_json::from_str(frame).unwrap();
        assert_eq!(
            event,
            ClientEvent::MatchJoin {
                match_id: SessionId::new("9f2c")
            }
        );
    }

    #[test]
    fn test_match_submit_language_defaults_to_python() {
        let frame = r#"{"event":"match:submit","data":{"matchId":"a","code":"def solve(x): pass"}}"#;
        let event: ClientEvent = serde_json::from_str(frame).unwrap();
        match event {
            ClientEvent::MatchSubmit { language, .. } => assert_eq!(language, "python"),
            other => panic!("expected MatchSubmit, got {other:?}"),
        }
    }

    #[test]
    fn test_match_progress_marker_is_opaque() {
        let frame = r#"{"event":"match:progress","data":{"matchId":"a","marker":{"line":12,"tests":[1,0]}}}"#;
        let event: ClientEvent = serde_json::from_str(frame).unwrap();
        match event {
            ClientEvent::MatchProgress { marker, .. } => {
                assert_eq!(marker, json!({"line": 12, "tests": [1, 0]}));
            }
            other => panic!("expected MatchProgress, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_event_name_fails() {
        let frame = r#"{"event":"match:spectate","data":{"matchId":"a"}}"#;
        assert!(serde_json::from_str::<ClientEvent>(frame).is_err());
    }

    #[test]
    fn test_missing_required_field_fails() {
        let frame = r#"{"event":"queue:join","data":{}}"#;
        assert!(serde_json::from_str::<ClientEvent>(frame).is_err());
    }

    #[test]
    fn test_match_found_json_shape() {
        let event = ServerEvent::MatchFound {
            match_id: SessionId::new("abc"),
            difficulty: Tier::Medium,
            scheduled_start: 1_700_000_005_000,
            starts_in_ms: 5000,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({
                "event": "match:found",
                "data": {
                    "matchId": "abc",
                    "difficulty": "medium",
                    "scheduledStart": 1_700_000_005_000u64,
                    "startsInMs": 5000
                }
            })
        );
        assert_eq!(event.session_id(), Some(&SessionId::new("abc")));
    }

    #[test]
    fn test_superseded_is_bare_event() {
        let value = serde_json::to_value(ServerEvent::ConnectionSuperseded).unwrap();
        assert_eq!(value, json!({"event": "connection:superseded"}));
    }

    #[test]
    fn test_opponent_progress_carries_label_not_identity() {
        let event = ServerEvent::OpponentProgress {
            match_id: SessionId::new("abc"),
            opponent: OPPONENT_LABEL.to_string(),
            marker: json!({"passed": 2}),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "match:opponentProgress");
        assert_eq!(value["data"]["opponent"], "opponent");
        assert_eq!(value["data"]["marker"]["passed"], 2);
    }

    #[test]
    fn test_match_state_snapshot_is_data_object() {
        let event = ServerEvent::MatchState(SessionSnapshot {
            match_id: SessionId::new("abc"),
            difficulty: Tier::Easy,
            state: SessionState::Active,
            scheduled_start: 10,
            elapsed_ms: -2000,
            you: ParticipantView {
                joined: true,
                connected: true,
                progress: None,
            },
            opponent: ParticipantView {
                joined: false,
                connected: true,
                progress: Some(json!(3)),
            },
        });
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "match:state");
        assert_eq!(value["data"]["state"], "active");
        assert_eq!(value["data"]["elapsedMs"], -2000);
        assert_eq!(value["data"]["opponent"]["progress"], 3);
    }

    #[test]
    fn test_match_complete_and_abandoned_shapes() {
        let complete = serde_json::to_value(ServerEvent::MatchComplete {
            match_id: SessionId::new("a"),
            verdict: None,
            result: MatchOutcome::Timeout,
        })
        .unwrap();
        assert_eq!(complete["data"]["result"], "timeout");
        assert!(complete["data"]["verdict"].is_null());

        let abandoned = serde_json::to_value(ServerEvent::MatchAbandoned {
            match_id: SessionId::new("a"),
            reason: AbandonReason::JoinTimeout,
        })
        .unwrap();
        assert_eq!(abandoned["event"], "match:abandoned");
        assert_eq!(abandoned["data"]["reason"], "joinTimeout");
    }

    #[test]
    fn test_error_event_shape() {
        let value = serde_json::to_value(ServerEvent::Error {
            code: 404,
            reason: "unknown session".into(),
        })
        .unwrap();
        assert_eq!(value, json!({"event": "error", "data": {"code": 404, "reason": "unknown session"}}));
    }
}
