//! Minidock CLI - run a command inside a registry image's filesystem.

pub mod commands;
