//! Console prompt and the single line read from standard input.

use std::future::Future;
use std::io::{self, BufRead, Write};

use tokio::sync::oneshot;

pub const PROMPT: &str = "Enter text: ";

/// Result of reading one line from the console.
#[derive(Debug)]
pub enum ConsoleInput {
    /// A line, with its line terminator removed. Invalid UTF-8 is replaced
    /// rather than rejected.
    Line(String),
    /// Standard input was closed before any byte was read.
    EndOfInput,
    /// The read failed, or input ended before a newline.
    Failed(io::Error),
}

/// Removes one trailing `\n` and then one trailing `\r`.
pub fn trim_line(line: &str) -> &str {
    let line = line.strip_suffix('\n').unwrap_or(line);
    line.strip_suffix('\r').unwrap_or(line)
}

/// Reads up to and including the first newline. Only a newline-terminated
/// read counts as a line.
pub fn read_line_from<R: BufRead>(reader: &mut R) -> ConsoleInput {
    let mut line = Vec::new();
    match reader.read_until(b'\n', &mut line) {
        Ok(0) => ConsoleInput::EndOfInput,
        Ok(_) if line.last() != Some(&b'\n') => ConsoleInput::Failed(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("input ended after {} bytes without a newline", line.len()),
        )),
        Ok(_) => ConsoleInput::Line(trim_line(&String::from_utf8_lossy(&line)).to_string()),
        Err(e) => ConsoleInput::Failed(e),
    }
}

/// Prints `text` without a newline and flushes stdout.
pub fn prompt(text: &str) -> io::Result<()> {
    let mut stdout = io::stdout().lock();
    stdout.write_all(text.as_bytes())?;
    stdout.flush()
}

/// Prints the echoed line.
pub fn echo(line: &str) -> io::Result<()> {
    let mut stdout = io::stdout().lock();
    writeln!(stdout, "{}", line)?;
    stdout.flush()
}

/// Reads one line from stdin on a dedicated thread.
///
/// A blocking stdin read inside the runtime's blocking pool would hold up
/// runtime shutdown until a line arrives, so the read gets its own thread
/// that is simply left behind if the process exits first.
pub fn spawn_line_reader() -> io::Result<impl Future<Output = ConsoleInput>> {
    let (tx, rx) = oneshot::channel();
    std::thread::Builder::new()
        .name("console-reader".to_string())
        .spawn(move || {
            let input = read_line_from(&mut io::stdin().lock());
            let _ = tx.send(input);
        })?;

    Ok(async move {
        rx.await.unwrap_or_else(|_| {
            ConsoleInput::Failed(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "console reader stopped without a result",
            ))
        })
    })
}
