use actix_web_actors::ws;
use log::{info, warn};

use crate::game::rules::RulesError;
use crate::game::utils::Side;
use crate::models::{lock, ClientMessage, GameSession, ServerMessage, SharedSession};
use crate::websocket::handler::ChessWebSocket;

fn parse_side(token: Option<&str>) -> Option<Side> {
    token.and_then(Side::from_token)
}

impl ChessWebSocket {
    fn current_session(&self, ctx: &mut ws::WebsocketContext<Self>) -> Option<(String, SharedSession)> {
        let code = match &self.code {
            Some(code) => code.clone(),
            None => {
                self.send_error(ctx, "Not in a session");
                return None;
            }
        };
        match self.app_state.session(&code) {
            Ok(session) => Some((code, session)),
            Err(e) => {
                warn!("{}", e);
                self.send_error(ctx, e.to_string());
                None
            }
        }
    }

    /// Run a state change on the current session, then persist and
    /// broadcast the new state to the room.
    fn update_session<F>(&mut self, ctx: &mut ws::WebsocketContext<Self>, change: F)
    where
        F: FnOnce(&mut GameSession) -> Result<(), RulesError>,
    {
        let (code, session) = match self.current_session(ctx) {
            Some(found) => found,
            None => return,
        };
        let outcome = {
            let mut s = lock(&session);
            change(&mut s).map(|()| s.snapshot())
        };
        match outcome {
            Ok(state) => {
                self.app_state.persist_snapshot(&state);
                self.app_state
                    .broadcast(&code, &ServerMessage::new("state").with_state(state));
            }
            Err(e) => {
                info!("Rejected update in session {}: {}", code, e);
                self.send_error(ctx, e.to_string());
            }
        }
    }

    pub fn handle_create(&mut self, msg: ClientMessage, ctx: &mut ws::WebsocketContext<Self>) {
        self.leave_room();

        let (code, session) = self
            .app_state
            .create_session(msg.minutes, msg.increment_seconds);
        let (seat, state) = {
            let mut s = lock(&session);
            (s.join(&self.id), s.snapshot())
        };
        self.enter_room(&code);
        self.side = seat.side();

        let mut response = ServerMessage::new("created").with_state(state);
        response.seat = Some(seat.token().to_string());
        self.send(ctx, &response);
    }

    pub fn handle_join(&mut self, msg: ClientMessage, ctx: &mut ws::WebsocketContext<Self>) {
        let requested = match msg.code {
            Some(code) => code,
            None => {
                warn!("No session code provided");
                self.send_error(ctx, "No session code provided");
                return;
            }
        };
        let session = match self.app_state.session(&requested) {
            Ok(session) => session,
            Err(e) => {
                warn!("{}", e);
                self.send_error(ctx, e.to_string());
                return;
            }
        };

        self.leave_room();
        let (code, seat, state) = {
            let mut s = lock(&session);
            let seat = s.join(&self.id);
            (s.code.clone(), seat, s.snapshot())
        };
        info!("Connection {} joined session {} as {}", self.id, code, seat.token());

        let mut notification = ServerMessage::new("player_joined").with_state(state.clone());
        notification.seat = Some(seat.token().to_string());
        self.app_state.broadcast(&code, &notification);

        self.enter_room(&code);
        self.side = seat.side();
        let mut response = ServerMessage::new("joined").with_state(state);
        response.seat = Some(seat.token().to_string());
        self.send(ctx, &response);
    }

    pub fn handle_move(&mut self, msg: ClientMessage, ctx: &mut ws::WebsocketContext<Self>) {
        let (code, session) = match self.current_session(ctx) {
            Some(found) => found,
            None => return,
        };
        let uci = match msg.move_uci {
            Some(uci) => uci,
            None => {
                self.send_error(ctx, "No move provided");
                return;
            }
        };

        let outcome = {
            let mut s = lock(&session);
            if !s.may_move(&self.id) {
                Err(("Not your turn".to_string(), s.snapshot()))
            } else {
                match s.apply_move(&uci) {
                    Ok(applied) => Ok((applied, s.snapshot())),
                    Err(e) => Err((e.to_string(), s.snapshot())),
                }
            }
        };

        match outcome {
            Ok((applied, state)) => {
                info!("Move {} in session {}", applied.san, code);
                self.app_state.persist_snapshot(&state);
                let mut message = ServerMessage::new("move_made").with_state(state);
                message.last_move = Some(applied);
                self.app_state.broadcast(&code, &message);
            }
            Err((reason, state)) => {
                info!("Move {} rejected in session {}: {}", uci, code, reason);
                let mut message = ServerMessage::error(reason).with_state(state);
                message.message_type = "move_rejected".to_string();
                self.send(ctx, &message);
            }
        }
    }

    pub fn handle_get_moves(&mut self, msg: ClientMessage, ctx: &mut ws::WebsocketContext<Self>) {
        let (code, session) = match self.current_session(ctx) {
            Some(found) => found,
            None => return,
        };
        let square = msg.square.unwrap_or_default();
        let moves = lock(&session).legal_destinations(&square);

        let mut response = ServerMessage::new("available_moves");
        response.code = Some(code);
        response.available_moves = Some(moves);
        self.send(ctx, &response);
    }

    pub fn handle_state(&mut self, ctx: &mut ws::WebsocketContext<Self>) {
        if let Some((_, session)) = self.current_session(ctx) {
            let state = lock(&session).snapshot();
            self.send(ctx, &ServerMessage::new("state").with_state(state));
        }
    }

    pub fn handle_clock_config(&mut self, msg: ClientMessage, ctx: &mut ws::WebsocketContext<Self>) {
        let minutes = msg.minutes.unwrap_or(self.app_state.config.default_minutes);
        let increment = msg
            .increment_seconds
            .unwrap_or(self.app_state.config.default_increment_secs);
        let side = parse_side(msg.side.as_deref());
        self.update_session(ctx, |s| {
            s.configure_clock(minutes, increment, side);
            Ok(())
        });
    }

    pub fn handle_clock_start(&mut self, msg: ClientMessage, ctx: &mut ws::WebsocketContext<Self>) {
        let side = parse_side(msg.side.as_deref());
        self.update_session(ctx, |s| {
            s.start_clock(side);
            Ok(())
        });
    }

    pub fn handle_clock_pause(&mut self, ctx: &mut ws::WebsocketContext<Self>) {
        self.update_session(ctx, |s| {
            s.pause_clock();
            Ok(())
        });
    }

    pub fn handle_reset(&mut self, msg: ClientMessage, ctx: &mut ws::WebsocketContext<Self>) {
        let side = parse_side(msg.side.as_deref());
        self.update_session(ctx, |s| {
            s.reset(side);
            Ok(())
        });
    }

    pub fn handle_load_fen(&mut self, msg: ClientMessage, ctx: &mut ws::WebsocketContext<Self>) {
        let fen = msg.fen.unwrap_or_default();
        self.update_session(ctx, |s| s.load_fen(&fen));
    }

    pub fn handle_import_pgn(&mut self, msg: ClientMessage, ctx: &mut ws::WebsocketContext<Self>) {
        let pgn = msg.pgn.unwrap_or_default();
        self.update_session(ctx, |s| s.import_record(&pgn));
    }
}
