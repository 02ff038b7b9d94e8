use std::mem;
use std::time::Duration;

use scrollbulk_core::{Error, Result};

/// Where a scroll stands between fetches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CursorState {
    /// No fetch issued yet; the next request carries the full query.
    Uninitialized,
    /// The last page was full; continue with this token.
    Active(String),
    /// Terminal. Reached on a short page or an explicit close.
    Exhausted,
}

/// Single-consumer pagination state for one query.
#[derive(Debug)]
pub struct ScrollCursor {
    state: CursorState,
    keep_alive: Duration,
}

impl ScrollCursor {
    pub fn new(keep_alive: Duration) -> Self { Self { state: CursorState::Uninitialized, keep_alive } }

    pub fn state(&self) -> &CursorState { &self.state }

    pub fn keep_alive(&self) -> Duration { self.keep_alive }

    pub fn is_exhausted(&self) -> bool { self.state == CursorState::Exhausted }

    /// `None` asks for the first page, `Some(token)` for a continuation.
    pub fn next_request(&self) -> Result<Option<&str>> {
        match &self.state {
            CursorState::Uninitialized => Ok(None),
            CursorState::Active(token) => Ok(Some(token)),
            CursorState::Exhausted => Err(Error::CursorExhausted),
        }
    }

    /// Same as `next_request` but only valid once a page has been fetched.
    pub fn next_token(&self) -> Result<&str> {
        match &self.state {
            CursorState::Active(token) => Ok(token),
            CursorState::Uninitialized => Err(Error::InvalidArgument("cursor has not fetched its first page".into())),
            CursorState::Exhausted => Err(Error::CursorExhausted),
        }
    }

    /// Records the outcome of a completed fetch.
    pub fn advance(&mut self, continuation: Option<String>) -> Result<()> {
        if self.is_exhausted() {
            return Err(Error::CursorExhausted);
        }
        self.state = match continuation {
            Some(token) => CursorState::Active(token),
            None => CursorState::Exhausted,
        };
        Ok(())
    }

    /// Moves to `Exhausted` and hands back the live token, if any, so the
    /// engine-side context can be released.
    pub fn close(&mut self) -> Option<String> {
        match mem::replace(&mut self.state, CursorState::Exhausted) {
            CursorState::Active(token) => Some(token),
            _ => None,
        }
    }
}
