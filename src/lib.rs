//! INTELICHAT: a retro-terminal chat server where humans talk in shared rooms
//! and six scripted LLM personalities answer `@mentions` or chat among
//! themselves in the AI Lounge.

pub mod admin;
pub mod agents;
pub mod chat;
pub mod cli;
pub mod completion;
pub mod config;
pub mod error;
pub mod hub;
pub mod lounge;
pub mod mention;
pub mod presence;
pub mod prompts;
pub mod providers;
pub mod store;
pub mod web;

use std::time::{SystemTime, UNIX_EPOCH};

pub use error::{ChatError, Result};

/// Current Unix epoch in milliseconds.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_ms_nonzero() {
        assert!(now_ms() > 0);
    }

    #[test]
    fn test_now_ms_monotonic_enough() {
        let a = now_ms();
        let b = now_ms();
        assert!(b >= a);
    }
}
