//! Read side of the transfer database, used by the `query` binary.

pub mod commands;
pub mod formatters;
