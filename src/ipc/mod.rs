// src/ipc/mod.rs

//! Length-prefixed JSON protocols.
//!
//! - `frame`: 4-byte big-endian length + JSON payload, shared by both.
//! - `control`: one request/response per connection, operator ↔ manager.
//! - `supervision`: persistent, id-correlated, manager ↔ worker process.

pub mod control;
pub mod frame;
pub mod supervision;

pub use control::{
    ControlCommand, ControlRequest, ControlResponse, ResponseStatus, send_request, serve,
};
pub use frame::{MAX_FRAME_LEN, encode_frame, read_frame, read_frame_opt, write_frame};
pub use supervision::{
    CommandFrame, EventFrame, SupervisionClient, SupervisionCommand, SupervisionEvent,
    serve_worker,
};
