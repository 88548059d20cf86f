//! Clickable `file:line[:col]` references in script output.
//!
//! Interpreter diagnostics look like `hello.main.kts:3:9: error: ...`. Given
//! an output snapshot and the name of the running file, [`find_links`]
//! returns every reference to that file so the UI can turn it into a link
//! that moves the editor caret. It is pure and never touches the runner.

use std::ops::Range;

use regex::Regex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLink {
    /// Zero-based line of the output snapshot containing the reference
    pub line_index: usize,
    /// Byte range of the reference within that output line
    pub range: Range<usize>,
    /// One-based line in the script
    pub line: u32,
    /// One-based column in the script, when the reference carries one
    pub column: Option<u32>,
}

/// Build the matcher for `file_name`.
///
/// The name must not be preceded by another path-name character, so
/// `other_hello.kts:1` does not link to `hello.kts`. A directory prefix
/// (`/work/hello.kts:1`) is accepted.
fn link_pattern(file_name: &str) -> Option<Regex> {
    let pattern = format!(
        r"(?:^|[^\w.\-])({}):(\d+)(?::(\d+))?",
        regex::escape(file_name)
    );
    Regex::new(&pattern).ok()
}

/// Find references to `file_name` in `output`
pub fn find_links(output: &str, file_name: &str) -> Vec<OutputLink> {
    if file_name.is_empty() {
        return Vec::new();
    }
    let Some(pattern) = link_pattern(file_name) else {
        return Vec::new();
    };

    let mut links = Vec::new();
    for (line_index, text) in output.lines().enumerate() {
        for caps in pattern.captures_iter(text) {
            let (Some(name), Some(line)) = (caps.get(1), caps.get(2)) else {
                continue;
            };
            let Ok(line_no) = line.as_str().parse::<u32>() else {
                continue;
            };
            if line_no == 0 {
                continue;
            }
            let column = caps
                .get(3)
                .and_then(|c| c.as_str().parse::<u32>().ok())
                .filter(|c| *c > 0);
            let end = match (caps.get(3), column) {
                (Some(col), Some(_)) => col.end(),
                _ => line.end(),
            };
            links.push(OutputLink {
                line_index,
                range: name.start()..end,
                line: line_no,
                column,
            });
        }
    }
    links
}
