//! A tus 1.0.0 resumable upload server.
//!
//! Upload records live in SQLite, upload bytes on local disk. Requests run
//! through [`services::dispatcher::TusDispatcher`], which composes the core
//! protocol with the creation, checksum, termination, download and
//! concatenation extensions.

pub mod config;
pub mod errors;
pub mod extensions;
pub mod handlers;
pub mod models;
pub mod protocol;
pub mod routes;
pub mod services;
