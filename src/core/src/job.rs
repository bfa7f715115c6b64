//! Mirror job input.
//!
//! Each input line is `SOURCE DEST TAG`. Lines starting with `#` or `//`
//! (after leading whitespace) are comments; anything that is not exactly
//! three whitespace-separated tokens is ignored.

use std::io::BufRead;

use crate::error::Result;

/// One (source, dest, tag) triple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorJob {
    pub source: String,
    pub dest: String,
    pub tag: String,
    /// 1-based input line number, for reporting.
    pub line: usize,
}

impl std::fmt::Display for MirrorJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -> {} ({})", self.source, self.dest, self.tag)
    }
}

fn is_comment(line: &str) -> bool {
    let line = line.trim_start();
    line.starts_with('#') || line.starts_with("//")
}

/// Parse one input line. `None` for comments, blanks and malformed lines.
pub fn parse_line(line: &str, line_number: usize) -> Option<MirrorJob> {
    if is_comment(line) {
        return None;
    }
    let mut tokens = line.split_whitespace();
    let (source, dest, tag) = (tokens.next()?, tokens.next()?, tokens.next()?);
    if tokens.next().is_some() {
        return None;
    }
    Some(MirrorJob {
        source: source.to_string(),
        dest: dest.to_string(),
        tag: tag.to_string(),
        line: line_number,
    })
}

/// Read every job from `reader`.
pub fn read_jobs(reader: impl BufRead) -> Result<Vec<MirrorJob>> {
    let mut jobs = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        match parse_line(&line, index + 1) {
            Some(job) => jobs.push(job),
            None if !line.trim().is_empty() && !is_comment(&line) => {
                tracing::debug!(line = index + 1, content = %line, "Skipping malformed input line");
            }
            None => {}
        }
    }
    Ok(jobs)
}
