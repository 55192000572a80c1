//! Bilingual block layout: each translated line follows its original,
//! paragraph breaks are kept and fenced code stays untouched.

/// Prefix placed in front of every translated line.
pub const TRANSLATION_MARKER: &str = "🔤 ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Line<'a> {
    /// Paragraph break.
    Blank,
    /// Code fence or fenced content, copied as-is.
    Verbatim(&'a str),
    Translatable(&'a str),
}

pub fn classify_lines(text: &str) -> Vec<Line<'_>> {
    let mut in_fence = false;
    text.trim_matches('\n')
        .split('\n')
        .map(|raw| {
            let line = raw.trim_end_matches('\r');
            if line.trim_start().starts_with("```") {
                in_fence = !in_fence;
                Line::Verbatim(line)
            } else if in_fence {
                Line::Verbatim(line)
            } else if line.trim().is_empty() {
                Line::Blank
            } else {
                Line::Translatable(line)
            }
        })
        .collect()
}

/// Lines to hand to the backend, in order.
pub fn translatable<'a>(lines: &[Line<'a>]) -> Vec<&'a str> {
    lines
        .iter()
        .filter_map(|line| match line {
            Line::Translatable(s) => Some(s.trim()),
            _ => None,
        })
        .collect()
}

/// Interleave originals with their translations. Returns `None` when the
/// number of translated lines doesn't match the translatable ones.
pub fn interleave(lines: &[Line<'_>], translated: &[&str]) -> Option<String> {
    if translatable(lines).len() != translated.len() {
        return None;
    }

    let mut out: Vec<String> = Vec::with_capacity(lines.len() * 2);
    let mut next = translated.iter();
    let mut previous_blank = false;

    for line in lines {
        match line {
            Line::Blank => {
                if !previous_blank {
                    out.push(String::new());
                }
                previous_blank = true;
                continue;
            }
            Line::Verbatim(s) => out.push(s.to_string()),
            Line::Translatable(s) => {
                out.push(s.to_string());
                if let Some(t) = next.next() {
                    let t = t.trim();
                    if !t.is_empty() {
                        out.push(format!("{}{}", TRANSLATION_MARKER, t));
                    }
                }
            }
        }
        previous_blank = false;
    }

    Some(out.join("\n"))
}

/// Layout used when translated lines can't be paired with the originals.
pub fn whole_block(original: &str, translated: &str) -> String {
    format!(
        "{}\n\n{}{}",
        original.trim(),
        TRANSLATION_MARKER,
        translated.trim()
    )
}
