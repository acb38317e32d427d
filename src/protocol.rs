//! Public protocol structs for WebSocket and HTTP endpoints (serde ready).
//! Solutions never leave the server except through a solved view.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{Case, CaseId};
use crate::submission::SubmissionView;

/// Messages the client can send over WebSocket.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientWsMessage {
    Ping,
    OpenSession {
        #[serde(rename = "caseId")]
        case_id: CaseId,
    },
    SubmitAnswer {
        #[serde(rename = "sessionId")]
        session_id: Uuid,
        answer: String,
        #[serde(default, rename = "accessToken")]
        access_token: Option<String>,
    },
    TryAgain {
        #[serde(rename = "sessionId")]
        session_id: Uuid,
    },
}

/// Messages the server sends back over WebSocket.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerWsMessage {
    Pong,
    Session {
        #[serde(rename = "sessionId")]
        session_id: Uuid,
        view: SubmissionView,
    },
    View {
        #[serde(rename = "sessionId")]
        session_id: Uuid,
        view: SubmissionView,
    },
    /// Sent right after the `view` that first shows the case as solved.
    Solved {
        #[serde(rename = "sessionId")]
        session_id: Uuid,
        #[serde(rename = "caseId")]
        case_id: CaseId,
    },
    Error {
        message: String,
    },
}

/// Case listing without its solution.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseOut {
    pub id: CaseId,
    pub title: String,
    pub xp_reward: u32,
}

pub fn to_out(c: &Case) -> CaseOut {
    CaseOut { id: c.id.clone(), title: c.title.clone(), xp_reward: c.xp_reward }
}

//
// HTTP request/response DTOs
//

#[derive(Debug, Deserialize)]
pub struct OpenSessionIn {
    #[serde(rename = "caseId")]
    pub case_id: CaseId,
}

#[derive(Debug, Serialize)]
pub struct SessionOut {
    #[serde(rename = "sessionId")]
    pub session_id: Uuid,
    pub view: SubmissionView,
}

#[derive(Deserialize)]
pub struct AnswerIn {
    pub answer: String,
}

#[derive(Deserialize, Default)]
pub struct SubmitIn {
    #[serde(default)]
    pub answer: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SubmitOut {
    #[serde(rename = "sessionId")]
    pub session_id: Uuid,
    pub view: SubmissionView,
    /// True only on the response where the solved notification fired.
    pub solved: bool,
}

#[derive(Serialize)]
pub struct HealthOut {
    pub ok: bool,
}

#[derive(Serialize)]
pub struct ErrorOut {
    pub error: String,
}
