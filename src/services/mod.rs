//! Domain services used by websocket and HTTP routes.
//!
//! ARCHITECTURE
//! ============
//! Service modules own the game rules and room bookkeeping so route handlers
//! can stay focused on protocol translation and connection plumbing.

pub mod chat;
pub mod phase;
pub mod room;
pub mod round;
pub mod session;
