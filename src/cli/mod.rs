//! CLI module for prochost - command-line interface and subcommands.
//!
//! Provides the main entry point with subcommands for running the host
//! runtime and inspecting its configuration.

pub mod commands;
pub mod run;

pub use commands::Cli;
