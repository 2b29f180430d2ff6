use chess::{BitBoard, Board, Color, Piece, EMPTY};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One of the two players. Serialized with the `"w"`/`"b"` tokens used on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    #[serde(rename = "w")]
    First,
    #[serde(rename = "b")]
    Second,
}

impl Side {
    pub fn opponent(self) -> Side {
        match self {
            Side::First => Side::Second,
            Side::Second => Side::First,
        }
    }

    pub fn token(self) -> &'static str {
        match self {
            Side::First => "w",
            Side::Second => "b",
        }
    }

    /// Human label used in reviews and status lines.
    pub fn label(self) -> &'static str {
        match self {
            Side::First => "White",
            Side::Second => "Black",
        }
    }

    /// Lenient token parse; anything unrecognised is treated as "no side".
    pub fn from_token(token: &str) -> Option<Side> {
        token.parse().ok()
    }
}

impl FromStr for Side {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "w" | "white" | "first" => Ok(Side::First),
            "b" | "black" | "second" => Ok(Side::Second),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

impl From<Color> for Side {
    fn from(color: Color) -> Self {
        match color {
            Color::White => Side::First,
            Color::Black => Side::Second,
        }
    }
}

impl From<Side> for Color {
    fn from(side: Side) -> Self {
        match side {
            Side::First => Color::White,
            Side::Second => Color::Black,
        }
    }
}

/// Check if the board has insufficient material for checkmate
pub fn has_insufficient_material(board: &Board) -> bool {
    let heavy = *board.pieces(Piece::Pawn) | *board.pieces(Piece::Rook) | *board.pieces(Piece::Queen);
    if heavy != EMPTY {
        return false;
    }

    let knights = *board.pieces(Piece::Knight);
    let bishops = *board.pieces(Piece::Bishop);
    let minors = (knights | bishops).popcnt();

    // K vs K, K+minor vs K
    if minors <= 1 {
        return true;
    }

    // Bishops only, all on one square colour (covers KB vs KB same colour)
    if knights == EMPTY {
        let light = bishops & light_squares();
        return light == EMPTY || light == bishops;
    }

    false
}

fn light_squares() -> BitBoard {
    // a1 is dark; a square is light when rank + file is odd
    chess::ALL_SQUARES
        .iter()
        .filter(|sq| (sq.get_rank().to_index() + sq.get_file().to_index()) % 2 == 1)
        .fold(EMPTY, |acc, sq| acc | BitBoard::from_square(*sq))
}
