//! regmirror CLI - mirror multi-arch images between registries.

pub mod commands;
pub mod output;
