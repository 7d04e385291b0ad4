//! Core data models for the tus upload server.
//!
//! `UploadInfo` is the persisted record of one upload; `ChecksumAlgorithm`
//! is the closed registry of digests the checksum extension accepts.

pub mod checksum;
pub mod upload;
