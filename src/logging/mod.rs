//! Root logger construction for embedding applications. Components never build their own
//! loggers; they derive children from the one injected at construction.

use slog::Drain;
use std::fs::OpenOptions;
use std::io;
use std::path::Path;

/// Async terminal logger tagged with this node's address.
pub fn stdout_logger(node_addr: &str) -> slog::Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();

    slog::Logger::root(drain, slog::o!("NodeAddr" => node_addr.to_string()))
}

/// Async plain-text file logger. Truncates on open.
pub fn file_logger(path: impl AsRef<Path>, node_addr: &str) -> io::Result<slog::Logger> {
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)?;

    let decorator = slog_term::PlainDecorator::new(file);
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();

    Ok(slog::Logger::root(
        drain,
        slog::o!("NodeAddr" => node_addr.to_string()),
    ))
}
