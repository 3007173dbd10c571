use crate::error::{Result, UploadError};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Int { width: usize, zero_pad: bool },
}

/// Builds remote object keys for one output configuration.
///
/// A key is `path_prefix + sequence_format(task_index, file_index) + extension`,
/// where the extension always starts with a `.`.
#[derive(Debug, Clone)]
pub struct FileSequencer {
    path_prefix: String,
    segments: Vec<Segment>,
    extension: String,
}

impl FileSequencer {
    pub fn new(path_prefix: &str, sequence_format: &str, file_ext: &str) -> Result<Self> {
        let segments = parse_sequence_format(sequence_format)?;
        Ok(Self {
            path_prefix: path_prefix.to_string(),
            segments,
            extension: normalize_extension(file_ext),
        })
    }

    pub fn next_key(&self, task_index: u32, file_index: u32) -> String {
        let mut key = self.path_prefix.clone();
        let mut values = [task_index, file_index].into_iter();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => key.push_str(text),
                Segment::Int { width, zero_pad } => {
                    // parse_sequence_format guarantees exactly two conversions
                    let value = values.next().unwrap_or_default();
                    if *zero_pad {
                        key.push_str(&format!("{:0width$}", value, width = *width));
                    } else {
                        key.push_str(&format!("{:width$}", value, width = *width));
                    }
                }
            }
        }
        key.push_str(&self.extension);
        key
    }
}

pub fn normalize_extension(file_ext: &str) -> String {
    if file_ext.starts_with('.') {
        file_ext.to_string()
    } else {
        format!(".{}", file_ext)
    }
}

/// Parses a printf-style pattern with exactly two integer conversions.
///
/// Accepts `%d`, `%Nd`, `%0Nd` and `%%`. The text between the two conversions
/// must contain a non-digit, otherwise `(1, 11)` and `(11, 1)` could collide.
fn parse_sequence_format(format: &str) -> Result<Vec<Segment>> {
    let invalid = |reason: &str| {
        UploadError::Configuration(format!("Invalid sequence_format '{}': {}", format, reason))
    };

    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut chars = format.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '%' {
            literal.push(c);
            continue;
        }

        if chars.peek() == Some(&'%') {
            chars.next();
            literal.push('%');
            continue;
        }

        let zero_pad = chars.peek() == Some(&'0');
        if zero_pad {
            chars.next();
        }
        let mut digits = String::new();
        while let Some(d) = chars.peek().filter(|d| d.is_ascii_digit()) {
            digits.push(*d);
            chars.next();
        }
        match chars.next() {
            Some('d') => {}
            Some(other) => return Err(invalid(&format!("unsupported conversion '%{}'", other))),
            None => return Err(invalid("dangling '%'")),
        }
        let width = if digits.is_empty() {
            0
        } else {
            digits.parse().map_err(|_| invalid("width out of range"))?
        };

        if !literal.is_empty() {
            segments.push(Segment::Literal(std::mem::take(&mut literal)));
        }
        segments.push(Segment::Int { width, zero_pad });
    }
    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }

    let positions: Vec<usize> = segments
        .iter()
        .enumerate()
        .filter(|(_, s)| matches!(s, Segment::Int { .. }))
        .map(|(i, _)| i)
        .collect();
    if positions.len() != 2 {
        return Err(invalid("expected exactly two integer conversions"));
    }

    let separated = segments[positions[0] + 1..positions[1]].iter().any(|s| {
        matches!(s, Segment::Literal(text) if text.chars().any(|c| !c.is_ascii_digit()))
    });
    if !separated {
        return Err(invalid(
            "conversions must be separated by at least one non-digit character",
        ));
    }

    Ok(segments)
}
