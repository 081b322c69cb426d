//! Pull Mermaid source out of a model reply.
//!
//! Models wrap the code in Markdown fences, prefix an info string, or add a
//! sentence of prose around it. When a fence is present only the first
//! fenced block is kept; otherwise a leading `mermaid` word is dropped.

const FENCE: &str = "```";
const INFO: &str = "mermaid";

pub fn extract(reply: &str) -> String {
    let text = reply.trim();

    let Some(start) = text.find(FENCE) else {
        return strip_info(text).trim().to_string();
    };

    let after = &text[start + FENCE.len()..];
    let body = match after.split_once('\n') {
        Some((info, rest)) if is_info_string(info) => rest,
        _ => strip_info(after.trim_start()),
    };
    let end = body.find(FENCE).unwrap_or(body.len());
    body[..end].trim().to_string()
}

/// Drop a leading `mermaid` word, but not the start of a longer word.
fn strip_info(text: &str) -> &str {
    match text.strip_prefix(INFO) {
        Some(rest) if rest.is_empty() || rest.starts_with(char::is_whitespace) => rest,
        _ => text,
    }
}

/// Only an empty line or a Mermaid language tag counts as the fence info
/// string. Anything else (`sequenceDiagram`, `graph TD`) is diagram source.
fn is_info_string(line: &str) -> bool {
    let tag = line.trim();
    tag.is_empty() || tag.eq_ignore_ascii_case(INFO) || tag.eq_ignore_ascii_case("mmd")
}
