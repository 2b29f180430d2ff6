use actix::*;
use actix_web::{web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use log::{info, warn};
use uuid::Uuid;

use crate::game::utils::Side;
use crate::models::{lock, AppState, ChessWebSocketMessage, ClientMessage, ServerMessage};

/// WebSocket handler for one client connection
pub struct ChessWebSocket {
    pub id: String,
    pub app_state: web::Data<AppState>,
    /// Session code of the room this connection is in
    pub code: Option<String>,
    pub side: Option<Side>,
}

impl ChessWebSocket {
    pub fn new(app_state: web::Data<AppState>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            app_state,
            code: None,
            side: None,
        }
    }

    /// Detach from the current room. The session itself stays registered.
    pub fn leave_room(&mut self) {
        let code = match self.code.take() {
            Some(code) => code,
            None => return,
        };

        {
            let mut connections = lock(&self.app_state.connections);
            if let Some(ids) = connections.get_mut(&code) {
                ids.retain(|id| id != &self.id);
                if ids.is_empty() {
                    connections.remove(&code);
                    info!("No more connections in session {}", code);
                }
            }
        }

        if let Ok(session) = self.app_state.session(&code) {
            lock(&session).leave(&self.id);
        }
        info!("Connection {} left session {}", self.id, code);
        self.side = None;
    }

    pub fn enter_room(&mut self, code: &str) {
        let mut connections = lock(&self.app_state.connections);
        let ids = connections.entry(code.to_string()).or_default();
        if !ids.contains(&self.id) {
            ids.push(self.id.clone());
        }
        self.code = Some(code.to_string());
    }

    pub fn send(&self, ctx: &mut ws::WebsocketContext<Self>, message: &ServerMessage) {
        match serde_json::to_string(message) {
            Ok(text) => ctx.text(text),
            Err(e) => {
                warn!("Failed to serialize response: {}", e);
                ctx.text("{\"message_type\": \"error\", \"error\": \"Internal server error\"}");
            }
        }
    }

    pub fn send_error(&self, ctx: &mut ws::WebsocketContext<Self>, text: impl Into<String>) {
        self.send(ctx, &ServerMessage::error(text));
    }

    pub fn handle_message(&mut self, msg: ClientMessage, ctx: &mut ws::WebsocketContext<Self>) {
        match msg.message_type.as_str() {
            "create" => self.handle_create(msg, ctx),
            "join" => self.handle_join(msg, ctx),
            "move" => self.handle_move(msg, ctx),
            "get_moves" => self.handle_get_moves(msg, ctx),
            "state" => self.handle_state(ctx),
            "clock_config" => self.handle_clock_config(msg, ctx),
            "clock_start" => self.handle_clock_start(msg, ctx),
            "clock_pause" => self.handle_clock_pause(ctx),
            "reset" => self.handle_reset(msg, ctx),
            "load_fen" => self.handle_load_fen(msg, ctx),
            "import_pgn" => self.handle_import_pgn(msg, ctx),
            other => {
                warn!("Unknown message type: {}", other);
                self.send_error(ctx, "Unknown message type");
            }
        }
    }
}

impl Actor for ChessWebSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        let total = {
            let mut sockets = lock(&self.app_state.sockets);
            sockets.insert(self.id.clone(), ctx.address());
            sockets.len()
        };
        info!("WebSocket connection started: {}", self.id);
        info!("Total active connections: {}", total);
    }

    fn stopping(&mut self, _: &mut Self::Context) -> Running {
        self.leave_room();

        let total = {
            let mut sockets = lock(&self.app_state.sockets);
            sockets.remove(&self.id);
            sockets.len()
        };
        info!("WebSocket connection closed: {}", self.id);
        info!("Total active connections: {}", total);

        Running::Stop
    }
}

impl Handler<ChessWebSocketMessage> for ChessWebSocket {
    type Result = ();

    fn handle(&mut self, msg: ChessWebSocketMessage, ctx: &mut Self::Context) {
        ctx.text(msg.0);
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for ChessWebSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {}
            Ok(ws::Message::Text(text)) => {
                match serde_json::from_str::<ClientMessage>(text.as_ref()) {
                    Ok(client_msg) => {
                        info!("Received {} from {}", client_msg.message_type, self.id);
                        self.handle_message(client_msg, ctx);
                    }
                    Err(e) => {
                        warn!("Error parsing client message: {}", e);
                        self.send_error(ctx, format!("Invalid message format: {}", e));
                    }
                }
            }
            Ok(ws::Message::Binary(_)) => {
                warn!("Binary messages are not supported");
                self.send_error(ctx, "Binary messages are not supported");
            }
            Ok(ws::Message::Close(reason)) => {
                info!("Connection closed: {:?}", reason);
                ctx.close(reason);
                ctx.stop();
            }
            _ => {
                ctx.stop();
            }
        }
    }
}

/// WebSocket connection handler
pub async fn ws_index(
    req: HttpRequest,
    stream: web::Payload,
    app_state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let socket = ChessWebSocket::new(app_state);
    info!("New WebSocket connection: {}", socket.id);
    ws::start(socket, &req, stream)
}
