//! The shared advice model: the common surface that lets the suggestion
//! builder treat clang-format's and clang-tidy's output uniformly, despite
//! their very different wire formats.

/// Something that can produce PR-review suggestions from a patched buffer.
///
/// `FormatAdvice` and `TidyAdvice` both implement this instead of sharing a
/// base class; the only thing they actually have in common is "maybe holds a
/// patched buffer" and "renders a tool-specific header for a suggestion".
pub trait PatchSource {
    /// The tool name as used in headings and `ReviewBatch` keys.
    fn tool_name(&self) -> &'static str;

    /// The full rewritten file contents produced by the tool's auto-fix pass,
    /// if a review was requested.
    fn patched(&self) -> Option<&[u8]>;

    /// Render the Markdown header for a suggestion spanning `[start, end]`
    /// (inclusive, post-image line numbers).
    fn suggestion_header(&self, start: u32, end: u32) -> String;
}
