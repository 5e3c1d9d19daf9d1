//! Local pipeline stages around the remote conversion.
//!
//! Each submodule implements one local transformation. None of them talk to
//! the network; the engine runs them between service calls.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ split ──▶ (service) ──▶ encode ──▶ combine
//! (path)    (pdfium)                (base64)   (merge, renumber)
//! ```
//!
//! 1. [`input`]   — expand a file or directory path; sniff content types
//! 2. [`split`]   — partition an oversized PDF; runs in `spawn_blocking`
//!    because pdfium is not async-safe
//! 3. [`encode`]  — decode service-returned assets into a unit's result slot
//! 4. [`combine`] — merge unit results in index order, renumber assets and
//!    place the output under a unique name

pub mod combine;
pub mod encode;
pub mod input;
pub mod split;
