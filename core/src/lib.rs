//! Core engine of the telepty bridge: PTY lifecycle, the byte-safe
//! output pipeline, and the chat-to-keystroke input translator.

pub mod ansi;
pub mod bridge;
pub mod config;
pub mod debounce;
pub mod error;
pub mod keymap;
pub mod pty;
pub mod restore;
pub mod router;
pub mod source;
pub mod telegram;
pub mod truncate;

pub use bridge::BridgeOptions;
pub use bridge::run;
pub use bridge::run_register;
pub use error::BridgeError;
pub use error::Result;
