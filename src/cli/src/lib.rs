//! Skiff CLI - pull container images and manage the local image store.

pub mod commands;
pub mod output;
