//! Engine for a keyboard-driven terminal client of a Discord-style
//! chat/voice service.
//!
//! The engine can be divided into a few cooperating parts: a persistent
//! gateway session streaming state updates over a compressed websocket, a
//! REST client for synchronous actions, a local store mirroring the user's
//! view of guilds, DMs, threads and messages, and a voice pipeline pairing
//! a signalling websocket with AEAD-protected RTP over UDP.
//!
//! The [`controller::Controller`] ties these together: it is the single
//! mutator of the [`state::Store`], drains the gateway's typed event
//! queues every tick, dispatches abstract user [`controller::Action`]s,
//! and pushes [`controller::ViewEvent`]s to the renderer. The terminal
//! renderer and input decoder themselves live outside this crate, as do
//! the clipboard, notification and media shims; they connect through the
//! traits and channels in [`controller`].

pub mod codec;
pub mod config;
pub mod controller;
pub mod gateway;
pub mod model;
pub mod parser;
pub mod perms;
pub mod profile;
pub mod rest;
pub mod search;
pub mod state;
pub mod voice;

mod error;
pub use error::{Error, Result};

mod serial;
