#![forbid(unsafe_code)]

//! Shared library behind the swipefeed binaries.
//!
//! `feed_bot` turns chat messages into downloads, `fetch_video` does the same
//! from the command line, and `viewer_backend` serves the resulting feed to
//! the touch-screen front-end. All three go through the modules below.

pub mod chat;
pub mod config;
pub mod download;
pub mod error;
pub mod feed;
pub mod index;
pub mod logging;
pub mod network;
pub mod playback;
pub mod preview;
pub mod process;
pub mod resolver;
pub mod security;

#[cfg(all(test, unix))]
mod test_support;
