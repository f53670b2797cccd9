//! # Multipart Form Parser
//!
//! A small dedicated parser for `multipart/form-data` request bodies,
//! isolated from the router so it can be tested (and fuzzed) on its own.
//! Parts are pulled one at a time with [`MultipartParser::next_part`];
//! each part carries its headers, the decoded `name`/`filename` from the
//! Content-Disposition header, and its raw bytes.

use tracing::debug;

/// One decoded part of a multipart body
#[derive(Debug, Clone, PartialEq)]
pub struct Part {
    /// Raw part headers as (name, value) pairs
    pub headers: Vec<(String, String)>,
    /// `name` parameter of the Content-Disposition header
    pub name: Option<String>,
    /// `filename` parameter of the Content-Disposition header
    pub filename: Option<String>,
    /// Part body bytes
    pub data: Vec<u8>,
}

impl Part {
    /// Body interpreted as UTF-8 text (lossy)
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.data).to_string()
    }
}

/// Pull-based multipart parser over a complete body
#[derive(Debug)]
pub struct MultipartParser<'a> {
    body: &'a [u8],
    delimiter: Vec<u8>,
    pos: usize,
    done: bool,
}

/// Extract the boundary parameter from a Content-Type header value
pub fn boundary_from_content_type(content_type: &str) -> Option<String> {
    let (_, params) = content_type.split_once("boundary=")?;
    let boundary = params.split(';').next().unwrap_or("").trim();
    let boundary = boundary.trim_matches('"');
    (!boundary.is_empty()).then(|| boundary.to_string())
}

impl<'a> MultipartParser<'a> {
    /// Create a parser over `body` with the given boundary string
    pub fn new(body: &'a [u8], boundary: &str) -> Self {
        Self {
            body,
            delimiter: format!("--{}", boundary).into_bytes(),
            pos: 0,
            done: false,
        }
    }

    /// Return the next part, or `None` at the closing delimiter / end of
    /// input. Malformed part fragments are skipped.
    pub fn next_part(&mut self) -> Option<Part> {
        while !self.done {
            // Advance to the next delimiter line
            let delim_start = find(&self.body[self.pos..], &self.delimiter)? + self.pos;
            let mut cursor = delim_start + self.delimiter.len();

            // "--" after the delimiter closes the body
            if self.body[cursor..].starts_with(b"--") {
                self.done = true;
                return None;
            }
            // Skip the CRLF terminating the delimiter line
            if self.body[cursor..].starts_with(b"\r\n") {
                cursor += 2;
            } else if self.body[cursor..].starts_with(b"\n") {
                cursor += 1;
            }

            // The part runs until the next delimiter
            let part_end = match find(&self.body[cursor..], &self.delimiter) {
                Some(rel) => cursor + rel,
                None => self.body.len(),
            };
            self.pos = part_end;

            match parse_part(&self.body[cursor..part_end]) {
                Some(part) => return Some(part),
                None => {
                    debug!("Skipping malformed multipart fragment");
                    continue;
                }
            }
        }
        None
    }
}

/// Parse one part: headers, blank line, body (trailing CRLF stripped)
fn parse_part(raw: &[u8]) -> Option<Part> {
    let header_end = find(raw, b"\r\n\r\n")?;
    let header_block = std::str::from_utf8(&raw[..header_end]).ok()?;

    let mut headers = Vec::new();
    let mut name = None;
    let mut filename = None;
    for line in header_block.split("\r\n") {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim().to_string();
        let value = value.trim().to_string();
        if key.eq_ignore_ascii_case("content-disposition") {
            name = disposition_param(&value, "name");
            filename = disposition_param(&value, "filename");
        }
        headers.push((key, value));
    }
    if headers.is_empty() {
        return None;
    }

    let mut data = &raw[header_end + 4..];
    // The CRLF before the next delimiter belongs to the framing, not the data
    if data.ends_with(b"\r\n") {
        data = &data[..data.len() - 2];
    }

    Some(Part {
        headers,
        name,
        filename,
        data: data.to_vec(),
    })
}

/// Extract a quoted parameter like `name="value"` from a header value
fn disposition_param(header_value: &str, param: &str) -> Option<String> {
    let marker = format!("{}=\"", param);
    for segment in header_value.split(';') {
        let segment = segment.trim();
        if let Some(rest) = segment.strip_prefix(&marker) {
            return rest.split('"').next().map(|s| s.to_string());
        }
    }
    None
}

/// First position of `needle` in `haystack`
fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
