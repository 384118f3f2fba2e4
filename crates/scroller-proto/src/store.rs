use crate::window::{self, Phase, ScrollCursor, Window};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Title shown while the player is stopped.
pub const STOP_TITLE: &str = "STOP";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("requested width {requested} outside 1..={max}")]
    WidthOutOfRange { requested: usize, max: usize },
    #[error("title of {len} characters does not fit in {capacity} slots")]
    TitleTooLong { len: usize, capacity: usize },
}

/// Point-in-time copy of the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TitleSnapshot {
    pub text: String,
    pub cursor: ScrollCursor,
    pub last_width: Option<usize>,
}

#[derive(Debug, Default)]
struct TitleState {
    /// Replaced as a whole, never edited in place.
    text: Arc<[char]>,
    cursor: ScrollCursor,
    last_width: Option<usize>,
}

/// Current title plus scroll cursor, shared by the watcher (writer) and the
/// socket server (renderer).
///
/// Every operation runs under one lock and none of them performs I/O while
/// holding it.
#[derive(Debug)]
pub struct TitleStore {
    state: Mutex<TitleState>,
    delimiter: Vec<char>,
    max_width: usize,
}

impl TitleStore {
    /// `max_width` bounds both request widths and titles: a title must leave
    /// room for its terminator in `max_width` slots.
    pub fn new(delimiter: &str, max_width: usize) -> Self {
        Self {
            state: Mutex::new(TitleState::default()),
            delimiter: delimiter.chars().collect(),
            max_width,
        }
    }

    pub async fn snapshot(&self) -> TitleSnapshot {
        let state = self.state.lock().await;
        TitleSnapshot {
            text: state.text.iter().collect(),
            cursor: state.cursor,
            last_width: state.last_width,
        }
    }

    /// Swap in a new title and restart scrolling.
    pub async fn replace(&self, text: &str) -> Result<(), StoreError> {
        let chars: Arc<[char]> = text.chars().collect();
        if chars.len() >= self.max_width {
            return Err(StoreError::TitleTooLong {
                len: chars.len(),
                capacity: self.max_width,
            });
        }

        let mut state = self.state.lock().await;
        state.text = chars;
        state.cursor = ScrollCursor::START;
        Ok(())
    }

    /// Render the window for `width` and advance the cursor, atomically.
    ///
    /// A width different from the previous request restarts scrolling.
    /// A rejected width leaves the store untouched.
    pub async fn render_next(&self, width: usize) -> Result<Window, StoreError> {
        if width == 0 || width > self.max_width {
            return Err(StoreError::WidthOutOfRange {
                requested: width,
                max: self.max_width,
            });
        }

        let mut state = self.state.lock().await;
        if state.last_width != Some(width) {
            state.last_width = Some(width);
            state.cursor = ScrollCursor::START;
        }
        let (window, next, phase) = window::render(&state.text, &self.delimiter, state.cursor, width);
        state.cursor = next;
        drop(state);

        if phase != Phase::Fits {
            debug!("render width={} phase={:?} next={:?}", width, phase, next);
        }
        Ok(window)
    }
}
