#![doc = "drive-reconcile: import reconciliation pipeline for scanned procurement documents."]

//! This crate contains the full reconciliation pipeline: folder scanning,
//! document extraction, fuzzy matching against procurement records, the
//! confirmation-queue state machine and the import session controller.
//! Collaborating systems (remote drive, document-understanding gateway,
//! domain persistence, object storage) are abstracted behind the traits in
//! [`contract`] and shipped with reqwest-based adapters.
//!
//! # Usage
//! Construct an [`session::ImportSession`] from concrete (or mock) collaborators
//! and call [`session::ImportSession::run`] for one import lane.

pub mod batch;
pub mod cli;
pub mod config;
pub mod contract;
pub mod domain;
pub mod drive;
pub mod engine;
pub mod extract;
pub mod load_config;
pub mod matching;
pub mod queue;
pub mod rest;
pub mod session;
