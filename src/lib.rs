//! # Nexus Chat
//!
//! A single-user chat client that keeps its transcript in SQLite and
//! streams replies from Google Gemini.
//!
//! The interesting part is the turn cycle: take the user's message and the
//! prior history, stream the reply fragment by fragment into visible state,
//! and persist the finished turn pair, keeping the visible conversation and
//! the store consistent when any step fails midway.
//!
//! ## Architecture
//!
//! ```text
//!  ┌──────────────┐   submit   ┌───────────────────┐  stream_chat  ┌──────────┐
//!  │ chat / HTTP  │──────────▶│ SessionController │─────────────▶│ Gemini   │
//!  │  frontends   │◀──────────│  (watch snapshots)│◀─────────────│ (SSE)    │
//!  └──────────────┘  snapshot  └─────────┬─────────┘   fragments   └──────────┘
//!                                        │ append / list / clear
//!                                        ▼
//!                               ┌──────────────────┐
//!                               │ TranscriptStore  │
//!                               │ SQLite / HTTP    │
//!                               └──────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! nexus init
//! GEMINI_API_KEY=... nexus serve
//! GEMINI_API_KEY=... nexus chat
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`models`] | Roles, turns, and agent settings |
//! | [`store`] | Transcript storage trait and backends |
//! | [`provider`] | Completion provider trait, Gemini client, SSE parsing |
//! | [`credential`] | API key lookup |
//! | [`session`] | One streamed reply as a fused fragment sequence |
//! | [`controller`] | Turn lifecycle and optimistic conversation state |
//! | [`server`] | HTTP API and streaming proxy |
//! | [`chat_cmd`] | Terminal client and transcript commands |
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Storage and completion error types |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod chat_cmd;
pub mod config;
pub mod controller;
pub mod credential;
pub mod db;
pub mod error;
pub mod migrate;
pub mod models;
pub mod provider;
pub mod server;
pub mod session;
pub mod store;
