//! Plugin factory: generate a plugin, build it in CI, fix it until it builds.
//!
//! ## Module Map
//!
//! ```text
//! ┌──────────┐   HTTP   ┌──────────────────────────────────────────────────┐
//! │  Client  │ ───────> │  server.rs  (axum Router, ServerConfig)          │
//! │          │ <─────── │    └─ api.rs  (route handlers, AppState)         │
//! └──────────┘ WebSocket│         │                                        │
//!                       │         │ BuildOrchestrator::build()/start_loop()│
//!                       │         v                                        │
//!                       │  orchestrator.rs  (single driver task)           │
//!                       │     │ publish      │ poll         │ fix          │
//!                       │     v              v              v              │
//!                       │  publisher.rs   poller.rs     autofix.rs         │
//!                       │     │              │              │              │
//!                       │     └── SourceHost ┘          CodeGenerator      │
//!                       │         (host.rs,             (ai.rs)            │
//!                       │          github.rs)                              │
//!                       └──────────────────────────────────────────────────┘
//! ```
//!
//! ## Supporting Modules
//!
//! | Module       | Responsibility                                           |
//! |--------------|----------------------------------------------------------|
//! | `models`     | `Project`, `BuildRun`, `BuildPhase`, `LoopState`, ...    |
//! | `session`    | `BuildSession`: project, log, settings, artifact         |
//! | `build_log`  | Append-only `BuildLog` and tail extraction               |
//! | `eternal`    | `EternalLoopController`, the fix-loop on/off switch      |
//! | `ci_config`  | Synthesizes the GitHub Actions workflow                  |
//! | `ws`         | `WsMessage` enum + `broadcast_message()` helper          |
//!
//! ## Typical Flow (eternal loop on)
//!
//! 1. `POST /api/loop/start` switches the loop on and spawns a driver.
//! 2. The publisher pushes every file plus the CI workflow, one write each.
//! 3. The poller samples the latest run every few seconds until a verdict.
//! 4. On failure the failed job logs land in the build log; if the loop is
//!    still on, the AI gets the log tail and returns a whole new project.
//! 5. After a short pause the driver republishes and goes back to step 3.
//! 6. Success, timeout, an error or `POST /api/loop/stop` ends the loop.

pub mod ai;
pub mod api;
pub mod autofix;
pub mod build_log;
pub mod ci_config;
pub mod eternal;
pub mod github;
pub mod host;
pub mod models;
pub mod orchestrator;
pub mod poller;
pub mod publisher;
pub mod server;
pub mod session;
pub mod ws;

#[cfg(test)]
mod testing;
