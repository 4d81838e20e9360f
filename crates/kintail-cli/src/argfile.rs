//! `@file` argument expansion.
//!
//! An argument `@path` is replaced by the lines of `path`, one argument per
//! non-empty line with surrounding whitespace removed. Expansion is not
//! recursive, and a bare `@` is left alone.

use std::ffi::OsString;
use std::path::Path;

use anyhow::{Context, Result};

/// Expand every `@file` argument after the program name.
///
/// # Errors
///
/// Fails if a referenced file cannot be read.
pub fn expand_args<I>(args: I) -> Result<Vec<OsString>>
where
    I: IntoIterator<Item = OsString>,
{
    let mut expanded = Vec::new();
    for (index, arg) in args.into_iter().enumerate() {
        let file = arg
            .to_str()
            .filter(|_| index > 0)
            .and_then(|s| s.strip_prefix('@'))
            .filter(|path| !path.is_empty());

        match file {
            Some(path) => expanded.extend(read_arg_file(Path::new(path))?),
            None => expanded.push(arg),
        }
    }
    Ok(expanded)
}

fn read_arg_file(path: &Path) -> Result<Vec<OsString>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read argument file {}", path.display()))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(OsString::from)
        .collect())
}
