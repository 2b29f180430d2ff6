use actix::Message;
use serde::{Deserialize, Serialize};

use crate::analysis::{Analysis, AnalysisLimits};
use crate::game::rules::AppliedMove;
use crate::models::game_state::SessionSnapshot;

/// Message sent from client to server
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ClientMessage {
    pub message_type: String,
    pub code: Option<String>,
    pub move_uci: Option<String>,
    pub square: Option<String>,
    /// `"w"` or `"b"`; anything else is ignored
    pub side: Option<String>,
    pub minutes: Option<u64>,
    pub increment_seconds: Option<u64>,
    pub fen: Option<String>,
    pub pgn: Option<String>,
}

/// Message sent from server to client
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ServerMessage {
    pub message_type: String,
    pub code: Option<String>,
    /// `"w"`, `"b"` or `"spectator"`
    pub seat: Option<String>,
    pub state: Option<SessionSnapshot>,
    pub available_moves: Option<Vec<String>>,
    pub last_move: Option<AppliedMove>,
    pub error: Option<String>,
}

impl ServerMessage {
    pub fn new(message_type: &str) -> Self {
        Self {
            message_type: message_type.to_string(),
            ..Default::default()
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            message_type: "error".to_string(),
            error: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn with_state(mut self, state: SessionSnapshot) -> Self {
        self.code = Some(state.code.clone());
        self.state = Some(state);
        self
    }
}

/// Message type for WebSocket communication
#[derive(Message)]
#[rtype(result = "()")]
pub struct ChessWebSocketMessage(pub String);

/// Optional search budget accepted by the review and engine endpoints.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct BudgetRequest {
    pub movetime_ms: Option<u64>,
    pub depth: Option<u8>,
    pub skill_level: Option<u8>,
}

impl BudgetRequest {
    pub fn limits(&self, fallback_ms: u64) -> AnalysisLimits {
        AnalysisLimits::from_parts(self.movetime_ms, self.depth, self.skill_level, fallback_ms)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ReviewRequest {
    pub pgn: String,
    #[serde(flatten)]
    pub budget: BudgetRequest,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct CreateSessionRequest {
    pub minutes: Option<u64>,
    pub increment_seconds: Option<u64>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SuggestResponse {
    pub code: String,
    pub fen: String,
    pub analysis: Analysis,
    pub best_move_san: Option<String>,
    pub pv_san: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct EngineMoveResponse {
    pub applied: AppliedMove,
    /// Short follow-up search from the new position; absent if it failed.
    pub analysis: Option<Analysis>,
    pub state: SessionSnapshot,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ErrorResponse {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::Budget;

    #[test]
    fn client_message_fields_are_optional() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"message_type":"move","move_uci":"e2e4"}"#).expect("parse");
        assert_eq!(msg.message_type, "move");
        assert_eq!(msg.move_uci.as_deref(), Some("e2e4"));
        assert!(msg.code.is_none());
    }

    #[test]
    fn review_request_flattens_budget() {
        let req: ReviewRequest =
            serde_json::from_str(r#"{"pgn":"1. e4","depth":12}"#).expect("parse");
        assert_eq!(req.budget.limits(200).budget, Budget::Depth(12));

        let req: ReviewRequest = serde_json::from_str(r#"{"pgn":"1. e4"}"#).expect("parse");
        assert_eq!(req.budget.limits(200).budget, Budget::MoveTime(200));
    }

    #[test]
    fn error_message_shape() {
        let value = serde_json::to_value(ServerMessage::error("Session not found")).expect("json");
        assert_eq!(value["message_type"], "error");
        assert_eq!(value["error"], "Session not found");
        assert!(value["state"].is_null());
    }
}
