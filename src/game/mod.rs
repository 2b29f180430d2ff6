pub mod clock;
pub mod rules;
pub mod utils;

pub use clock::{Clock, ClockState, ClockView, ManualTime, MonotonicTime, TimeSource};
pub use rules::{AppliedMove, ChessGame, GameRecord, Outcome, RulesError, StatusFlags};
pub use utils::Side;
