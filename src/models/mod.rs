pub mod app_state;
pub mod game_state;
pub mod messages;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use app_state::{AppState, SharedSession};
pub use game_state::{GameSession, Seat, SessionError, SessionSnapshot};
pub use messages::*;

/// Lock a mutex, recovering the data if a previous holder panicked.
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
