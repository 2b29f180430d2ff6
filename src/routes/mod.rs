use actix_web::http::StatusCode;
use actix_web::{web, Error, HttpResponse, Responder, ResponseError};
use log::info;

use crate::analysis::{review_record, AnalyzerError, CancelToken};
use crate::models::{
    AppState, BudgetRequest, CreateSessionRequest, ErrorResponse, ReviewRequest, ServerMessage,
    SessionError,
};

impl ResponseError for SessionError {
    fn status_code(&self) -> StatusCode {
        match self {
            SessionError::NotFound(_) => StatusCode::NOT_FOUND,
            SessionError::Rules(_) => StatusCode::BAD_REQUEST,
            SessionError::PositionChanged => StatusCode::CONFLICT,
            SessionError::Analyzer(AnalyzerError::NotFound) => StatusCode::SERVICE_UNAVAILABLE,
            SessionError::Analyzer(_) | SessionError::NoEngineMove => StatusCode::BAD_GATEWAY,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorResponse {
            error: self.to_string(),
        })
    }
}

/// Cancels a review when the request future is dropped, e.g. because the
/// client went away before the blocking work finished.
struct CancelOnDrop(CancelToken);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

/// HTTP handler for the index page
pub async fn index() -> impl Responder {
    HttpResponse::Ok().body("Chess clock and review server")
}

pub async fn engine_probe(app_state: web::Data<AppState>) -> Result<HttpResponse, Error> {
    let analyzer = app_state.analyzer.clone();
    let report = web::block(move || analyzer.probe()).await?;
    Ok(HttpResponse::Ok().json(report))
}

pub async fn review(
    app_state: web::Data<AppState>,
    body: web::Json<ReviewRequest>,
) -> Result<HttpResponse, Error> {
    let request = body.into_inner();
    let limits = request.budget.limits(app_state.config.review_movetime_ms);
    let guard = CancelOnDrop(CancelToken::new());
    let cancel = guard.0.clone();

    let state = app_state.clone();
    let summary = web::block(move || {
        review_record(state.analyzer.as_ref(), &request.pgn, &limits, &cancel)
    })
    .await?;
    drop(guard);

    Ok(HttpResponse::Ok().json(summary))
}

pub async fn create_session(
    app_state: web::Data<AppState>,
    body: Option<web::Json<CreateSessionRequest>>,
) -> impl Responder {
    let request = body.map(web::Json::into_inner).unwrap_or_default();
    let (_, session) = app_state.create_session(request.minutes, request.increment_seconds);
    let state = crate::models::lock(&session).snapshot();
    HttpResponse::Created().json(state)
}

pub async fn get_session(
    app_state: web::Data<AppState>,
    code: web::Path<String>,
) -> Result<HttpResponse, Error> {
    let state = app_state.lookup_snapshot(&code)?;
    Ok(HttpResponse::Ok().json(state))
}

pub async fn session_pgn(
    app_state: web::Data<AppState>,
    code: web::Path<String>,
) -> Result<HttpResponse, Error> {
    let session = app_state.session(&code)?;
    let pgn = crate::models::lock(&session).export_record();
    Ok(HttpResponse::Ok()
        .content_type("application/x-chess-pgn")
        .body(pgn))
}

pub async fn session_review(
    app_state: web::Data<AppState>,
    code: web::Path<String>,
    body: Option<web::Json<BudgetRequest>>,
) -> Result<HttpResponse, Error> {
    let budget = body.map(web::Json::into_inner).unwrap_or_default();
    let limits = budget.limits(app_state.config.review_movetime_ms);
    let guard = CancelOnDrop(CancelToken::new());
    let cancel = guard.0.clone();

    let state = app_state.clone();
    let code = code.into_inner();
    let summary = web::block(move || state.review_session(&code, &limits, &cancel)).await??;
    drop(guard);

    Ok(HttpResponse::Ok().json(summary))
}

pub async fn suggest(
    app_state: web::Data<AppState>,
    code: web::Path<String>,
) -> Result<HttpResponse, Error> {
    let state = app_state.clone();
    let code = code.into_inner();
    let suggestion = web::block(move || state.suggest(&code)).await??;
    Ok(HttpResponse::Ok().json(suggestion))
}

pub async fn engine_move(
    app_state: web::Data<AppState>,
    code: web::Path<String>,
) -> Result<HttpResponse, Error> {
    let state = app_state.clone();
    let code = code.into_inner();
    let outcome = web::block(move || state.engine_move(&code)).await??;

    info!("Engine move {} in session {}", outcome.applied.uci, outcome.state.code);
    let mut message = ServerMessage::new("move_made").with_state(outcome.state.clone());
    message.last_move = Some(outcome.applied.clone());
    app_state.broadcast(&outcome.state.code, &message);

    Ok(HttpResponse::Ok().json(outcome))
}

/// Configure the HTTP routes
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/ws").route(web::get().to(crate::websocket::ws_index)))
        .service(web::resource("/").route(web::get().to(index)))
        .service(web::resource("/engine/probe").route(web::get().to(engine_probe)))
        .service(web::resource("/review").route(web::post().to(review)))
        .service(web::resource("/sessions").route(web::post().to(create_session)))
        .service(web::resource("/sessions/{code}").route(web::get().to(get_session)))
        .service(web::resource("/sessions/{code}/pgn").route(web::get().to(session_pgn)))
        .service(web::resource("/sessions/{code}/review").route(web::post().to(session_review)))
        .service(web::resource("/sessions/{code}/suggest").route(web::post().to(suggest)))
        .service(
            web::resource("/sessions/{code}/engine_move").route(web::post().to(engine_move)),
        );
}
