//! Library surface for `flowfile-cli`'s integration tests: the `main.rs`
//! binary is a thin wrapper around [`dispatch`].

mod cli;

pub use cli::{dispatch, Cli, Commands};
