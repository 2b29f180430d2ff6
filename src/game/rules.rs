//! Rules engine adapter over the `chess` crate.
//!
//! Everything that needs to know chess rules goes through here: move
//! validation, SAN rendering, game-over detection and reading/writing
//! game records. The clock and the review pipeline never touch the
//! board directly.

use chess::{Board, BoardStatus, ChessMove, File, MoveGen, Piece, Square};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use thiserror::Error;

use crate::game::utils::{has_insufficient_material, Side};

/// Input the rules engine refuses. No state is mutated when one of these is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RulesError {
    #[error("invalid FEN: {0}")]
    InvalidFen(String),

    #[error("invalid square: {0}")]
    InvalidSquare(String),

    #[error("invalid move format: {0}")]
    InvalidMove(String),

    #[error("illegal move: {0}")]
    IllegalMove(String),

    #[error("game is already over")]
    GameOver,

    #[error("flag has fallen")]
    Flagged,

    #[error("malformed game record: {0}")]
    MalformedRecord(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "winner")]
pub enum Outcome {
    Decisive(Side),
    Draw,
    Ongoing,
}

impl Outcome {
    pub fn result_tag(self) -> Option<&'static str> {
        match self {
            Outcome::Decisive(Side::First) => Some("1-0"),
            Outcome::Decisive(Side::Second) => Some("0-1"),
            Outcome::Draw => Some("1/2-1/2"),
            Outcome::Ongoing => None,
        }
    }
}

/// Machine-readable position flags sent to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusFlags {
    pub check: bool,
    pub mate: bool,
    pub game_over: bool,
    pub turn: Side,
    pub check_square: Option<String>,
    pub result: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedMove {
    pub uci: String,
    pub san: String,
}

/// A parsed game record: where it starts and the mainline that follows.
#[derive(Debug, Clone)]
pub struct GameRecord {
    pub start: Board,
    pub moves: Vec<ChessMove>,
}

/// Positions reached while replaying a move list; `positions[i]` is the
/// board before ply `i + 1`, the last entry is the final position.
#[derive(Debug, Clone)]
pub struct Replay {
    pub positions: Vec<Board>,
}

impl Replay {
    pub fn final_position(&self) -> Board {
        self.positions.last().copied().unwrap_or_default()
    }
}

/// A game in progress: start position, current board and mainline history.
#[derive(Debug, Clone)]
pub struct ChessGame {
    start: Board,
    board: Board,
    moves: Vec<ChessMove>,
    repetitions: HashMap<u64, u32>,
}

impl Default for ChessGame {
    fn default() -> Self {
        Self::new()
    }
}

impl ChessGame {
    pub fn new() -> Self {
        Self::from_board(Board::default())
    }

    pub fn from_board(start: Board) -> Self {
        let mut repetitions = HashMap::new();
        repetitions.insert(start.get_hash(), 1);
        Self {
            start,
            board: start,
            moves: Vec::new(),
            repetitions,
        }
    }

    pub fn from_fen(fen: &str) -> Result<Self, RulesError> {
        parse_fen(fen).map(Self::from_board)
    }

    pub fn from_record(record: &GameRecord) -> Result<Self, RulesError> {
        let mut game = Self::from_board(record.start);
        for mv in &record.moves {
            game.apply_move(*mv)?;
        }
        Ok(game)
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn start(&self) -> &Board {
        &self.start
    }

    pub fn moves(&self) -> &[ChessMove] {
        &self.moves
    }

    pub fn fen(&self) -> String {
        self.board.to_string()
    }

    pub fn side_to_move(&self) -> Side {
        self.board.side_to_move().into()
    }

    /// Destination squares for the piece on `square`; empty for bad input.
    pub fn legal_destinations(&self, square: &str) -> Vec<String> {
        let from = match parse_square(square) {
            Ok(sq) => sq,
            Err(_) => return Vec::new(),
        };
        let mut dests: Vec<String> = MoveGen::new_legal(&self.board)
            .filter(|mv| mv.get_source() == from)
            .map(|mv| mv.get_dest().to_string())
            .collect();
        dests.dedup();
        dests
    }

    pub fn is_move_legal(&self, uci: &str) -> bool {
        parse_uci(uci).map(|mv| self.board.legal(mv)).unwrap_or(false)
    }

    /// Apply a move given in UCI (`e2e4`, `e7e8q`).
    pub fn apply(&mut self, uci: &str) -> Result<AppliedMove, RulesError> {
        let mv = parse_uci(uci).ok_or_else(|| RulesError::InvalidMove(uci.to_string()))?;
        self.apply_move(mv)
    }

    pub fn apply_move(&mut self, mv: ChessMove) -> Result<AppliedMove, RulesError> {
        if self.is_game_over() {
            return Err(RulesError::GameOver);
        }
        if !self.board.legal(mv) {
            return Err(RulesError::IllegalMove(mv.to_string()));
        }
        let san = to_san(&self.board, mv);
        self.board = self.board.make_move_new(mv);
        self.moves.push(mv);
        *self.repetitions.entry(self.board.get_hash()).or_insert(0) += 1;
        Ok(AppliedMove {
            uci: mv.to_string(),
            san,
        })
    }

    pub fn is_game_over(&self) -> bool {
        self.outcome() != Outcome::Ongoing
    }

    pub fn outcome(&self) -> Outcome {
        match self.board.status() {
            BoardStatus::Checkmate => Outcome::Decisive(self.side_to_move().opponent()),
            BoardStatus::Stalemate => Outcome::Draw,
            BoardStatus::Ongoing => {
                if has_insufficient_material(&self.board) || self.is_fivefold_repetition() {
                    Outcome::Draw
                } else {
                    Outcome::Ongoing
                }
            }
        }
    }

    fn is_fivefold_repetition(&self) -> bool {
        self.repetitions
            .get(&self.board.get_hash())
            .is_some_and(|count| *count >= 5)
    }

    fn in_check(&self) -> bool {
        self.board.checkers().popcnt() > 0
    }

    /// Human-readable status line.
    pub fn status_label(&self) -> &'static str {
        match self.board.status() {
            BoardStatus::Checkmate => "Checkmate",
            BoardStatus::Stalemate => "Stalemate",
            BoardStatus::Ongoing if has_insufficient_material(&self.board) => {
                "Draw by insufficient material"
            }
            BoardStatus::Ongoing if self.is_fivefold_repetition() => "Draw by rule",
            BoardStatus::Ongoing if self.in_check() => "Check",
            BoardStatus::Ongoing => "Ongoing",
        }
    }

    pub fn status_flags(&self) -> StatusFlags {
        let check = self.in_check();
        let check_square = if check {
            Some(self.board.king_square(self.board.side_to_move()).to_string())
        } else {
            None
        };
        let outcome = self.outcome();
        StatusFlags {
            check,
            mate: self.board.status() == BoardStatus::Checkmate,
            game_over: outcome != Outcome::Ongoing,
            turn: self.side_to_move(),
            check_square,
            result: outcome.result_tag().map(str::to_string),
        }
    }

    pub fn san_move_list(&self) -> Vec<String> {
        let mut board = self.start;
        self.moves
            .iter()
            .map(|mv| {
                let san = to_san(&board, *mv);
                board = board.make_move_new(*mv);
                san
            })
            .collect()
    }

    pub fn export_pgn(&self) -> String {
        let result = self.outcome().result_tag().unwrap_or("*");
        serialize(&self.start, &self.moves, result)
    }
}

pub fn parse_fen(fen: &str) -> Result<Board, RulesError> {
    Board::from_str(fen.trim()).map_err(|e| RulesError::InvalidFen(format!("{e:?}")))
}

pub fn parse_square(square: &str) -> Result<Square, RulesError> {
    Square::from_str(&square.trim().to_lowercase())
        .map_err(|_| RulesError::InvalidSquare(square.to_string()))
}

/// Parse long algebraic notation without consulting a position.
pub fn parse_uci(text: &str) -> Option<ChessMove> {
    let text = text.trim();
    if !(4..=5).contains(&text.len()) || !text.is_ascii() {
        return None;
    }
    let from = Square::from_str(&text[0..2].to_lowercase()).ok()?;
    let to = Square::from_str(&text[2..4].to_lowercase()).ok()?;
    let promotion = match text.get(4..5) {
        None => None,
        Some(p) => Some(match p.to_ascii_lowercase().as_str() {
            "q" => Piece::Queen,
            "r" => Piece::Rook,
            "b" => Piece::Bishop,
            "n" => Piece::Knight,
            _ => return None,
        }),
    };
    Some(ChessMove::new(from, to, promotion))
}

fn piece_letter(piece: Piece) -> char {
    match piece {
        Piece::Pawn => 'P',
        Piece::Knight => 'N',
        Piece::Bishop => 'B',
        Piece::Rook => 'R',
        Piece::Queen => 'Q',
        Piece::King => 'K',
    }
}

fn file_char(square: Square) -> char {
    (b'a' + square.get_file().to_index() as u8) as char
}

fn rank_char(square: Square) -> char {
    (b'1' + square.get_rank().to_index() as u8) as char
}

/// SAN for a legal move in `board`, including the check/mate suffix.
pub fn to_san(board: &Board, mv: ChessMove) -> String {
    let mut san = san_body(board, mv);
    let next = board.make_move_new(mv);
    if next.checkers().popcnt() > 0 {
        san.push(if next.status() == BoardStatus::Checkmate {
            '#'
        } else {
            '+'
        });
    }
    san
}

fn san_body(board: &Board, mv: ChessMove) -> String {
    let src = mv.get_source();
    let dst = mv.get_dest();
    let piece = match board.piece_on(src) {
        Some(piece) => piece,
        None => return mv.to_string(),
    };

    let file_shift = src.get_file().to_index().abs_diff(dst.get_file().to_index());
    if piece == Piece::King && file_shift == 2 {
        return if dst.get_file() == File::G { "O-O" } else { "O-O-O" }.to_string();
    }

    let is_capture = board.piece_on(dst).is_some() || (piece == Piece::Pawn && file_shift != 0);
    let mut san = String::new();

    if piece == Piece::Pawn {
        if is_capture {
            san.push(file_char(src));
        }
    } else {
        san.push(piece_letter(piece));
        let rivals: Vec<Square> = MoveGen::new_legal(board)
            .filter(|other| {
                other.get_dest() == dst
                    && other.get_source() != src
                    && board.piece_on(other.get_source()) == Some(piece)
            })
            .map(|other| other.get_source())
            .collect();
        if !rivals.is_empty() {
            let shares_file = rivals.iter().any(|sq| sq.get_file() == src.get_file());
            let shares_rank = rivals.iter().any(|sq| sq.get_rank() == src.get_rank());
            if !shares_file {
                san.push(file_char(src));
            } else if !shares_rank {
                san.push(rank_char(src));
            } else {
                san.push(file_char(src));
                san.push(rank_char(src));
            }
        }
    }

    if is_capture {
        san.push('x');
    }
    san.push_str(&dst.to_string());
    if let Some(promotion) = mv.get_promotion() {
        san.push('=');
        san.push(piece_letter(promotion));
    }
    san
}

/// Resolve a SAN or UCI token against `board`.
pub fn resolve_move(board: &Board, token: &str) -> Result<ChessMove, RulesError> {
    let token = token.trim();
    if token.is_empty() {
        return Err(RulesError::InvalidMove(token.to_string()));
    }

    if let Ok(mv) = ChessMove::from_san(board, token) {
        if board.legal(mv) {
            return Ok(mv);
        }
    }

    // Lenient pass: annotation glyphs, "0-0" castling, missing capture
    // marks and "e8Q" style promotions.
    let loose = |s: &str| s.replace(['x', '='], "");
    let wanted = loose(&token.trim_end_matches(['+', '#', '!', '?']).replace('0', "O"));
    if let Some(mv) = MoveGen::new_legal(board).find(|mv| loose(&san_body(board, *mv)) == wanted) {
        return Ok(mv);
    }

    match parse_uci(token) {
        Some(mv) if board.legal(mv) => Ok(mv),
        Some(_) => Err(RulesError::IllegalMove(token.to_string())),
        None => Err(RulesError::InvalidMove(token.to_string())),
    }
}

pub fn replay(start: &Board, moves: &[ChessMove]) -> Result<Replay, RulesError> {
    let mut positions = Vec::with_capacity(moves.len() + 1);
    let mut board = *start;
    positions.push(board);
    for mv in moves {
        if !board.legal(*mv) {
            return Err(RulesError::IllegalMove(mv.to_string()));
        }
        board = board.make_move_new(*mv);
        positions.push(board);
    }
    Ok(Replay { positions })
}

const RESULT_TOKENS: [&str; 4] = ["1-0", "0-1", "1/2-1/2", "*"];

/// Parse a PGN-style record: tag pairs, movetext with comments, NAGs,
/// variations and move numbers. Only the mainline is kept.
pub fn parse_record(text: &str) -> Result<GameRecord, RulesError> {
    if text.trim().is_empty() {
        return Err(RulesError::MalformedRecord("empty record".to_string()));
    }

    let mut fen_tag = None;
    let mut movetext = String::new();
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with('%') {
            continue;
        }
        if trimmed.starts_with('[') {
            if let Some((key, value)) = parse_tag(trimmed) {
                if key.eq_ignore_ascii_case("FEN") {
                    fen_tag = Some(value);
                }
            }
            continue;
        }
        movetext.push_str(line);
        movetext.push('\n');
    }

    let start = match fen_tag {
        Some(fen) => parse_fen(&fen).map_err(|e| RulesError::MalformedRecord(e.to_string()))?,
        None => Board::default(),
    };

    let mut board = start;
    let mut moves = Vec::new();
    for raw in strip_commentary(&movetext).split_whitespace() {
        if RESULT_TOKENS.contains(&raw) || raw.starts_with('$') {
            continue;
        }
        let token = strip_move_number(raw);
        if token.is_empty() {
            continue;
        }
        let mv = resolve_move(&board, token).map_err(|e| {
            RulesError::MalformedRecord(format!("ply {}: {}", moves.len() + 1, e))
        })?;
        board = board.make_move_new(mv);
        moves.push(mv);
    }

    Ok(GameRecord { start, moves })
}

fn parse_tag(line: &str) -> Option<(String, String)> {
    let inner = line.strip_prefix('[')?.strip_suffix(']')?.trim();
    let (key, rest) = inner.split_once(char::is_whitespace)?;
    let value = rest.trim().strip_prefix('"')?.strip_suffix('"')?;
    Some((key.to_string(), value.replace("\\\"", "\"")))
}

fn strip_commentary(movetext: &str) -> String {
    let mut out = String::with_capacity(movetext.len());
    let mut in_brace = false;
    let mut in_line_comment = false;
    let mut variation_depth = 0usize;
    for c in movetext.chars() {
        if in_line_comment {
            if c == '\n' {
                in_line_comment = false;
                out.push(' ');
            }
            continue;
        }
        if in_brace {
            if c == '}' {
                in_brace = false;
                out.push(' ');
            }
            continue;
        }
        match c {
            '{' => in_brace = true,
            ';' => in_line_comment = true,
            '(' => variation_depth += 1,
            ')' => {
                variation_depth = variation_depth.saturating_sub(1);
                out.push(' ');
            }
            _ if variation_depth > 0 => {}
            _ => out.push(c),
        }
    }
    out
}

fn strip_move_number(token: &str) -> &str {
    let rest = token.trim_start_matches(|c: char| c.is_ascii_digit());
    if rest.len() == token.len() {
        return token;
    }
    if rest.is_empty() {
        // bare number
        return rest;
    }
    if rest.starts_with('.') {
        return rest.trim_start_matches('.');
    }
    token
}

/// Render a move list as PGN with a minimal tag roster.
pub fn serialize(start: &Board, moves: &[ChessMove], result: &str) -> String {
    let date = chrono::Local::now().format("%Y.%m.%d");
    let mut out = String::new();
    out.push_str("[Event \"Local Game\"]\n");
    out.push_str("[Site \"chess_clock_review\"]\n");
    out.push_str(&format!("[Date \"{date}\"]\n"));
    out.push_str("[White \"White\"]\n");
    out.push_str("[Black \"Black\"]\n");
    out.push_str(&format!("[Result \"{result}\"]\n"));
    if *start != Board::default() {
        out.push_str("[SetUp \"1\"]\n");
        out.push_str(&format!("[FEN \"{start}\"]\n"));
    }
    out.push('\n');

    let mut board = *start;
    let mut number = 1;
    let mut tokens = Vec::with_capacity(moves.len() + moves.len() / 2 + 1);
    for (i, mv) in moves.iter().enumerate() {
        let white_to_move = board.side_to_move() == chess::Color::White;
        if white_to_move {
            tokens.push(format!("{number}."));
        } else if i == 0 {
            tokens.push(format!("{number}..."));
        }
        tokens.push(to_san(&board, *mv));
        if !white_to_move {
            number += 1;
        }
        board = board.make_move_new(*mv);
    }
    tokens.push(result.to_string());
    out.push_str(&tokens.join(" "));
    out.push('\n');
    out
}
