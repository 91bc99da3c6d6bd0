//! Record line codec
//!
//! A table file holds one record per line. Fields are separated by `@`;
//! backslashes, `@` and newlines inside a field are escaped so a line can
//! always be split on the delimiter before unescaping.
//!
//! ```text
//! 1@It rained.@1
//! 2@a\sb\\c@1        <- field two is "a@b\c"
//! ```

/// Field delimiter within a record line
pub const FIELD_DELIMITER: char = '@';

/// Record delimiter
pub const RECORD_DELIMITER: char = '\n';

/// Escape a field value for storage.
///
/// Backslashes are doubled first so the escapes introduced afterwards are
/// never themselves re-escaped.
pub fn escape(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace(FIELD_DELIMITER, "\\s")
        .replace(RECORD_DELIMITER, "\\n")
}

/// Reverse [`escape`].
///
/// Only `\\`, `\s` and `\n` are recognized; any other backslash sequence
/// passes through literally.
pub fn unescape(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '\\' {
            result.push(ch);
            continue;
        }
        match chars.peek() {
            Some('\\') => {
                result.push('\\');
                chars.next();
            }
            Some('s') => {
                result.push(FIELD_DELIMITER);
                chars.next();
            }
            Some('n') => {
                result.push(RECORD_DELIMITER);
                chars.next();
            }
            _ => result.push('\\'),
        }
    }

    result
}

/// Split a stored line on the field delimiter, leaving escapes in place
pub fn split(line: &str) -> Vec<&str> {
    line.split(FIELD_DELIMITER).collect()
}

/// Split a stored line into its unescaped fields
pub fn decode_line(line: &str) -> Vec<String> {
    split(line).into_iter().map(unescape).collect()
}

/// Join fields into a stored line (without the record delimiter)
pub fn encode_line<S: AsRef<str>>(fields: &[S]) -> String {
    join(fields.iter().map(|f| escape(f.as_ref())))
}

/// Join already-rendered fields with the field delimiter
pub fn join<I, S>(fields: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut line = String::new();
    for (i, field) in fields.into_iter().enumerate() {
        if i > 0 {
            line.push(FIELD_DELIMITER);
        }
        line.push_str(field.as_ref());
    }
    line
}
