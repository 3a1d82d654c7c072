//! ServerQuery line format: value escaping, record parsing, and status lines.
//!
//! A command is a single line. Its reply is zero or more data lines followed by a status line of
//! the form `error id=<n> msg=<text>`. Data lines carry `|`-separated records, each a list of
//! space-separated `key=value` pairs or bare flags.

// std
use std::collections::HashMap;
// self
use crate::_prelude::*;

/// Status id returned when a listing query has nothing to report.
pub const EMPTY_RESULT_SET: u32 = 1281;

/// One `key=value` record from a data line.
pub type Record = HashMap<String, String>;

/// Parsed `error id=… msg=…` line terminating every reply.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Status {
	/// Numeric status; zero means success.
	pub id: u32,
	/// Unescaped status message.
	pub message: String,
}
impl Status {
	/// Parse a status line, returning `None` when the line is not one.
	pub fn parse(line: &str) -> Option<Self> {
		let fields = line.strip_prefix("error ")?;
		let record = parse_record(fields);
		let id = record.get("id")?.parse().ok()?;
		let message = record.get("msg").cloned().unwrap_or_default();

		Some(Self { id, message })
	}

	/// Whether the command succeeded.
	pub fn is_ok(&self) -> bool {
		self.id == 0
	}

	/// Convert a failing status into [`Error::Query`].
	pub fn into_result(self) -> Result<()> {
		if self.is_ok() { Ok(()) } else { Err(Error::Query { id: self.id, message: self.message }) }
	}
}

/// Escape a value for use in a command argument.
pub fn escape(value: &str) -> String {
	let mut escaped = String::with_capacity(value.len());

	for c in value.chars() {
		match c {
			'\\' => escaped.push_str("\\\\"),
			'/' => escaped.push_str("\\/"),
			' ' => escaped.push_str("\\s"),
			'|' => escaped.push_str("\\p"),
			'\u{7}' => escaped.push_str("\\a"),
			'\u{8}' => escaped.push_str("\\b"),
			'\u{c}' => escaped.push_str("\\f"),
			'\n' => escaped.push_str("\\n"),
			'\r' => escaped.push_str("\\r"),
			'\t' => escaped.push_str("\\t"),
			'\u{b}' => escaped.push_str("\\v"),
			other => escaped.push(other),
		}
	}

	escaped
}

/// Reverse [`escape`]. Unknown escape sequences are kept literally.
pub fn unescape(value: &str) -> String {
	let mut unescaped = String::with_capacity(value.len());
	let mut chars = value.chars();

	while let Some(c) = chars.next() {
		if c != '\\' {
			unescaped.push(c);

			continue;
		}

		match chars.next() {
			Some('\\') => unescaped.push('\\'),
			Some('/') => unescaped.push('/'),
			Some('s') => unescaped.push(' '),
			Some('p') => unescaped.push('|'),
			Some('a') => unescaped.push('\u{7}'),
			Some('b') => unescaped.push('\u{8}'),
			Some('f') => unescaped.push('\u{c}'),
			Some('n') => unescaped.push('\n'),
			Some('r') => unescaped.push('\r'),
			Some('t') => unescaped.push('\t'),
			Some('v') => unescaped.push('\u{b}'),
			Some(other) => {
				unescaped.push('\\');
				unescaped.push(other);
			},
			None => unescaped.push('\\'),
		}
	}

	unescaped
}

/// Parse one record of space-separated fields. Bare flags map to an empty value.
pub fn parse_record(fields: &str) -> Record {
	fields
		.split(' ')
		.filter(|field| !field.is_empty())
		.map(|field| match field.split_once('=') {
			Some((key, value)) => (key.to_owned(), unescape(value)),
			None => (field.to_owned(), String::new()),
		})
		.collect()
}

/// Parse every record carried by the given data lines.
pub fn parse_records<'a, I>(lines: I) -> Vec<Record>
where
	I: IntoIterator<Item = &'a str>,
{
	lines
		.into_iter()
		.flat_map(|line| line.split('|'))
		.map(parse_record)
		.filter(|record| !record.is_empty())
		.collect()
}

/// Strip the stray carriage return left over from `\n\r` line endings.
pub fn normalize_line(line: &str) -> &str {
	line.trim_matches('\r')
}
