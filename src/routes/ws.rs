//! WebSocket upgrade + message loop. Each client message is parsed as JSON and
//! forwarded to the session ops. A submit that solves the case is followed by
//! a separate `solved` message. Sessions opened over a connection are closed
//! when it ends.

use std::sync::Arc;
use async_trait::async_trait;
use axum::{
  extract::{
    ws::{Message, WebSocket},
    State, WebSocketUpgrade,
  },
  http::HeaderMap,
  response::IntoResponse,
};
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use crate::protocol::{ClientWsMessage, ServerWsMessage};
use crate::routes::http::bearer_token;
use crate::state::AppState;

#[instrument(level = "info", skip(ws, state, headers))]
pub async fn ws_upgrade(
  ws: WebSocketUpgrade,
  State(state): State<Arc<AppState>>,
  headers: HeaderMap,
) -> impl IntoResponse {
  info!(target: "case_desk", "WebSocket upgrade requested");
  let token = bearer_token(&headers);
  ws.on_upgrade(move |socket| handle_ws(socket, state, token))
}

/// Message transport for one client. Lets the loop run off a real socket.
#[async_trait]
trait Connection: Send {
  async fn recv(&mut self) -> Option<Result<Message, axum::Error>>;
  async fn send(&mut self, msg: Message) -> Result<(), axum::Error>;
}

#[async_trait]
impl Connection for WebSocket {
  async fn recv(&mut self) -> Option<Result<Message, axum::Error>> { WebSocket::recv(self).await }
  async fn send(&mut self, msg: Message) -> Result<(), axum::Error> { WebSocket::send(self, msg).await }
}

#[instrument(level = "info", skip(socket, state, token))]
async fn handle_ws(mut socket: WebSocket, state: Arc<AppState>, token: Option<String>) {
  info!(target: "case_desk", "WebSocket connected");
  serve_connection(&mut socket, &state, token.as_deref()).await;
}

/// Run the message loop until the client goes away, then release its sessions.
async fn serve_connection<C: Connection>(conn: &mut C, state: &AppState, token: Option<&str>) {
  let mut opened: Vec<Uuid> = Vec::new();
  'conn: while let Some(Ok(msg)) = conn.recv().await {
    match msg {
      Message::Text(txt) => {
        let replies = match serde_json::from_str::<ClientWsMessage>(&txt) {
          Ok(incoming) => {
            debug!(target: "case_desk", kind = message_kind(&incoming), "WS received");
            handle_client_ws(incoming, state, token, &mut opened).await
          }
          Err(e) => vec![ServerWsMessage::Error { message: format!("Invalid JSON: {}", e) }],
        };

        for reply in replies {
          let out = serde_json::to_string(&reply).unwrap_or_else(|e| {
            serde_json::json!({ "type": "error", "message": format!("Serialization error: {}", e) }).to_string()
          });
          if let Err(e) = conn.send(Message::Text(out)).await {
            error!(target: "case_desk", error = %e, "WS send error");
            break 'conn;
          }
        }
      }
      Message::Ping(payload) => { let _ = conn.send(Message::Pong(payload)).await; }
      Message::Close(_) => break,
      _ => {}
    }
  }
  let released = state.close_sessions(&opened).await;
  info!(target: "case_desk", opened = opened.len(), released, "WebSocket disconnected");
}

fn message_kind(msg: &ClientWsMessage) -> &'static str {
  match msg {
    ClientWsMessage::Ping => "ping",
    ClientWsMessage::OpenSession { .. } => "open_session",
    ClientWsMessage::SubmitAnswer { .. } => "submit_answer",
    ClientWsMessage::TryAgain { .. } => "try_again",
  }
}

/// A message-level token wins over the one sent with the upgrade request.
/// Ids of sessions opened here are pushed to `opened`.
async fn handle_client_ws(
  msg: ClientWsMessage,
  state: &AppState,
  upgrade_token: Option<&str>,
  opened: &mut Vec<Uuid>,
) -> Vec<ServerWsMessage> {
  match msg {
    ClientWsMessage::Ping => vec![ServerWsMessage::Pong],

    ClientWsMessage::OpenSession { case_id } => match state.open_session(&case_id).await {
      Some((session_id, view)) => {
        opened.push(session_id);
        vec![ServerWsMessage::Session { session_id, view }]
      }
      None => vec![ServerWsMessage::Error { message: format!("unknown case: {}", case_id) }],
    },

    ClientWsMessage::SubmitAnswer { session_id, answer, access_token } => {
      let token = access_token.as_deref().or(upgrade_token);
      match state.submit(session_id, Some(answer), token).await {
        Ok((view, done)) => {
          info!(target: "submission", %session_id, phase = %done.phase, solved = done.solved_now, "WS submit evaluated");
          let mut out = vec![ServerWsMessage::View { session_id, view }];
          if done.solved_now {
            out.push(ServerWsMessage::Solved { session_id, case_id: done.case_id });
          }
          out
        }
        Err(e) => vec![ServerWsMessage::Error { message: e.to_string() }],
      }
    }

    ClientWsMessage::TryAgain { session_id } => match state.try_again(session_id).await {
      Ok(view) => vec![ServerWsMessage::View { session_id, view }],
      Err(e) => vec![ServerWsMessage::Error { message: e.to_string() }],
    },
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::backend::MemoryBackend;
  use crate::domain::CaseId;
  use crate::seeds::seed_cases;

  fn state() -> AppState {
    AppState::with_cases(seed_cases(), Arc::new(MemoryBackend::new()))
  }

  async fn open_over_ws(state: &AppState, opened: &mut Vec<Uuid>, case_id: &str) -> Uuid {
    let replies = handle_client_ws(
      ClientWsMessage::OpenSession { case_id: CaseId::from(case_id) },
      state,
      None,
      opened,
    )
    .await;
    match &replies[..] {
      [ServerWsMessage::Session { session_id, .. }] => *session_id,
      other => panic!("unexpected reply: {:?}", other),
    }
  }

  #[tokio::test]
  async fn ws_flow_reports_solved_after_view() {
    let state = state();
    let mut opened = Vec::new();
    let session_id = open_over_ws(&state, &mut opened, "case-001").await;
    assert_eq!(opened, vec![session_id]);

    let replies = handle_client_ws(
      ClientWsMessage::SubmitAnswer { session_id, answer: "John Doe".into(), access_token: None },
      &state,
      None,
      &mut opened,
    )
    .await;
    assert_eq!(replies.len(), 2);
    assert!(matches!(replies[0], ServerWsMessage::View { .. }));
    assert!(matches!(&replies[1], ServerWsMessage::Solved { case_id, .. } if case_id.as_str() == "case-001"));
  }

  #[tokio::test]
  async fn ws_try_again_on_fresh_session_is_an_error() {
    let state = state();
    let (session_id, _) = state.open_session(&CaseId::from("case-001")).await.unwrap();
    let replies = handle_client_ws(ClientWsMessage::TryAgain { session_id }, &state, None, &mut Vec::new()).await;
    assert!(matches!(replies[..], [ServerWsMessage::Error { .. }]));
  }

  /// Scripted client: yields `incoming` then hangs up; sends fail once `fail_sends` is set.
  struct Scripted {
    incoming: std::collections::VecDeque<Message>,
    sent: Vec<String>,
    fail_sends: bool,
  }

  impl Scripted {
    fn new(msgs: &[&str], fail_sends: bool) -> Self {
      Self { incoming: msgs.iter().map(|m| Message::Text(m.to_string())).collect(), sent: Vec::new(), fail_sends }
    }
  }

  #[async_trait]
  impl Connection for Scripted {
    async fn recv(&mut self) -> Option<Result<Message, axum::Error>> { self.incoming.pop_front().map(Ok) }
    async fn send(&mut self, msg: Message) -> Result<(), axum::Error> {
      if self.fail_sends {
        return Err(axum::Error::new(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "client gone")));
      }
      if let Message::Text(t) = msg {
        self.sent.push(t);
      }
      Ok(())
    }
  }

  #[tokio::test]
  async fn ws_disconnect_releases_only_its_sessions() {
    let state = state();
    let (other, _) = state.open_session(&CaseId::from("case-002")).await.unwrap();
    let mut conn = Scripted::new(
      &[r#"{"type":"open_session","caseId":"case-001"}"#, r#"{"type":"open_session","caseId":"case-002"}"#],
      false,
    );
    serve_connection(&mut conn, &state, None).await;

    assert_eq!(conn.sent.len(), 2);
    assert!(conn.sent.iter().all(|m| m.contains(r#""type":"session""#)));
    let sessions = state.sessions.read().await;
    assert_eq!(sessions.len(), 1);
    assert!(sessions.contains_key(&other));
  }

  #[tokio::test]
  async fn ws_send_failure_still_releases_sessions() {
    let state = state();
    let mut conn = Scripted::new(&[r#"{"type":"open_session","caseId":"case-001"}"#], true);
    serve_connection(&mut conn, &state, None).await;
    assert!(state.sessions.read().await.is_empty());
  }
}
