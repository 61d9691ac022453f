//! This module holds functionality specific to running clang-format and
//! parsing its output.

use std::process::Command;

// non-std crates
use serde::Deserialize;
use serde_xml_rs::de::Deserializer;

// project-specific crates/modules
use crate::advice::PatchSource;
use crate::common_fs::{get_line_cols_from_offset, FileObj};
use crate::config::LinesChangedOnly;
use crate::error::Result;

/// A single replacement that clang-format wants to make, translated from its
/// raw byte offset into a `(line, column)` pair.
#[derive(Debug, Clone, PartialEq)]
pub struct FormatReplacement {
    /// The column number of where the suggestion starts on the line.
    pub cols: usize,
    /// The number of bytes removed by this replacement.
    pub null_len: usize,
    /// The text to insert at `cols`.
    pub text: String,
}

/// All the replacements clang-format wants to make on a single line.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplacementLine {
    /// The (1-based) line number these replacements apply to.
    pub line: u32,
    pub replacements: Vec<FormatReplacement>,
}

/// A single file's worth of clang-format advice.
#[derive(Debug, Clone, Default)]
pub struct FormatAdvice {
    /// The source file this advice concerns (forward-slash separated).
    pub filename: String,

    /// Lines with at least one replacement, in strictly increasing order.
    pub replaced_lines: Vec<ReplacementLine>,

    /// The fully-formatted file contents, captured by re-running
    /// clang-format without `--output-replacements-xml` when a format
    /// review was requested.
    pub patched: Option<Vec<u8>>,
}

impl PatchSource for FormatAdvice {
    fn tool_name(&self) -> &'static str {
        "clang-format"
    }

    fn patched(&self) -> Option<&[u8]> {
        self.patched.as_deref()
    }

    fn suggestion_header(&self, _start: u32, _end: u32) -> String {
        "### clang-format suggestions\n".to_string()
    }
}

/// Returns the sum of clang-format errors: files with at least one
/// replacement.
pub fn tally_format_advice(advice: &[Option<FormatAdvice>]) -> i32 {
    advice
        .iter()
        .filter(|a| a.as_ref().is_some_and(|a| !a.replaced_lines.is_empty()))
        .count() as i32
}

/// Maps a clang-format style name to the capitalized name used in file
/// annotations.
pub fn formalize_style_name(style: &str) -> String {
    if style.starts_with("llvm") || style.starts_with("gnu") {
        style.to_ascii_uppercase()
    } else if ["google", "chromium", "microsoft", "mozilla", "webkit"].contains(&style) {
        let mut chars = style.chars();
        match chars.next() {
            None => String::new(),
            Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        }
    } else {
        String::from("Custom")
    }
}

/// Raw deserialization target for clang-format's `--output-replacements-xml`.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(rename = "replacements")]
struct RawReplacements {
    #[serde(rename = "$value")]
    replacements: Vec<RawReplacement>,
}

#[derive(Debug, Deserialize, PartialEq)]
struct RawReplacement {
    offset: usize,
    length: usize,
    #[serde(rename = "$value")]
    value: Option<String>,
}

fn parse_format_replacements_xml(
    xml_out: &str,
    file: &FileObj,
    scope: LinesChangedOnly,
) -> Result<FormatAdvice> {
    let filename = file.name.to_string_lossy().replace('\\', "/");
    let mut advice = FormatAdvice {
        filename,
        replaced_lines: Vec::new(),
        patched: None,
    };
    if xml_out.trim().is_empty() {
        return Ok(advice);
    }
    let config = serde_xml_rs::ParserConfig::new()
        .trim_whitespace(false)
        .whitespace_to_characters(true)
        .ignore_root_level_whitespace(true);
    let event_reader = serde_xml_rs::EventReader::new_with_config(xml_out.as_bytes(), config);
    let raw = match RawReplacements::deserialize(&mut Deserializer::new(event_reader)) {
        Ok(raw) => raw,
        Err(e) => {
            log::warn!("failed to parse clang-format XML output: {e}");
            return Ok(advice);
        }
    };
    let ranges = file.range_of_changed_lines(scope);
    for raw_repl in raw.replacements {
        let (line, cols) = get_line_cols_from_offset(&file.name, raw_repl.offset)?;
        let line = line as u32;
        let in_scope = match &ranges {
            None => true,
            Some(ranges) => ranges.iter().any(|r| r.contains(&line)),
        };
        if !in_scope {
            continue;
        }
        let fix = FormatReplacement {
            cols,
            null_len: raw_repl.length,
            text: raw_repl.value.unwrap_or_default(),
        };
        match advice.replaced_lines.last_mut() {
            Some(last) if last.line == line => last.replacements.push(fix),
            _ => advice.replaced_lines.push(ReplacementLine {
                line,
                replacements: vec![fix],
            }),
        }
    }
    Ok(advice)
}

/// Run clang-format on `file`, then parse and return its XML output.
///
/// When `format_review` is set, clang-format is invoked a second time
/// without `--output-replacements-xml` to capture the fully-formatted
/// buffer on stdout.
pub fn run_clang_format(
    cmd: &mut Command,
    file: &FileObj,
    style: &str,
    scope: LinesChangedOnly,
    format_review: bool,
) -> Result<FormatAdvice> {
    let mut line_args = Vec::new();
    if let Some(ranges) = file.range_of_changed_lines(scope) {
        for range in &ranges {
            // clang-format's `--lines` takes an inclusive end.
            line_args.push(format!("--lines={}:{}", range.start, range.end.saturating_sub(1)));
        }
    }

    cmd.arg(format!("-style={style}"));
    cmd.args(&line_args);
    cmd.arg("--output-replacements-xml");
    cmd.arg(file.name.to_string_lossy().as_ref());
    log::info!(
        "Running \"{} {}\"",
        cmd.get_program().to_string_lossy(),
        cmd.get_args()
            .map(|x| x.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ")
    );
    let output = cmd.output()?;
    if !output.status.success() {
        log::debug!(
            "clang-format raised the following error(s):\n{}",
            String::from_utf8_lossy(&output.stderr)
        );
    }
    let xml = String::from_utf8_lossy(&output.stdout)
        .lines()
        .collect::<Vec<&str>>()
        .join("");
    let mut advice = parse_format_replacements_xml(&xml, file, scope)?;

    if format_review {
        let mut cmd = Command::new(cmd.get_program());
        cmd.arg(format!("-style={style}"));
        cmd.arg(file.name.to_string_lossy().as_ref());
        log::info!(
            "Getting fixes with \"{} {}\"",
            cmd.get_program().to_string_lossy(),
            cmd.get_args()
                .map(|x| x.to_string_lossy())
                .collect::<Vec<_>>()
                .join(" ")
        );
        let formatted = cmd.output()?;
        advice.patched = Some(formatted.stdout);
    }
    Ok(advice)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_xml() {
        let xml_raw = r#"<?xml version='1.0'?>
<replacements xml:space='preserve' incomplete_format='false'>
<replacement offset='0' length='5'>&#10;      </replacement>
</replacements>"#;
        let xml = xml_raw.lines().collect::<Vec<&str>>().join("");
        let config = serde_xml_rs::ParserConfig::new()
            .trim_whitespace(false)
            .whitespace_to_characters(true)
            .ignore_root_level_whitespace(true);
        let event_reader = serde_xml_rs::EventReader::new_with_config(xml.as_bytes(), config);
        let document =
            RawReplacements::deserialize(&mut serde_xml_rs::de::Deserializer::new(event_reader))
                .unwrap();
        assert_eq!(document.replacements.len(), 1);
        assert_eq!(document.replacements[0].offset, 0);
        assert_eq!(
            document.replacements[0].value,
            Some(String::from("\n      "))
        );
    }

    #[test]
    fn formalize_names() {
        assert_eq!(formalize_style_name("llvm"), "LLVM");
        assert_eq!(formalize_style_name("google"), "Google");
        assert_eq!(formalize_style_name("{}"), "Custom");
    }
}
