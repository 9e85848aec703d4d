//! Per-line structural classification.
//!
//! Classification priority follows the region rules: fenced code delimiters,
//! then table rows, headings, list items, blank, plain. HTML markers are an
//! opt-in second dialect mapped onto the same classes.

use crate::config::DocumentStructureConfig;

/// Structural class of one physical line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum LineClass {
    /// ``` or ~~~ fence; toggles the fenced-code region.
    Fence,
    /// `<pre>` opener (HTML dialect).
    PreOpen,
    /// `</pre>` closer (HTML dialect).
    PreClose,
    /// Pipe-delimited row with at least two columns.
    TableRow,
    /// Markdown `#` heading or `<h1>`–`<h6>` within the configured range.
    Heading { level: u8, text: String },
    /// `-`/`*`/`+` or `<digits>.` list item, or `<li>`.
    ListItem {
        ordered: bool,
        indent_spaces: usize,
        text: String,
    },
    /// Empty after trimming.
    Blank,
    Plain,
}

/// Width of the line's leading whitespace, tabs expanded to `tab_width`.
pub(crate) fn leading_width(line: &str, tab_width: usize) -> usize {
    let mut width = 0;
    for c in line.chars() {
        match c {
            ' ' => width += 1,
            '\t' => width += tab_width.max(1),
            _ => break,
        }
    }
    width
}

pub(crate) fn classify(line: &str, cfg: &DocumentStructureConfig) -> LineClass {
    let trimmed = line.trim();

    if cfg.detect_markdown && (trimmed.starts_with("```") || trimmed.starts_with("~~~")) {
        return LineClass::Fence;
    }
    if cfg.detect_html {
        let lower = trimmed.to_ascii_lowercase();
        if lower.starts_with("<pre") {
            return LineClass::PreOpen;
        }
        if lower.starts_with("</pre") {
            return LineClass::PreClose;
        }
        if let Some(heading) = html_heading(trimmed, cfg) {
            return heading;
        }
        if let Some(inner) = html_tag_body(trimmed, "li") {
            return LineClass::ListItem {
                ordered: false,
                indent_spaces: leading_width(line, cfg.tab_width),
                text: inner,
            };
        }
    }
    if cfg.detect_markdown {
        if is_table_row(trimmed) {
            return LineClass::TableRow;
        }
        if let Some(heading) = markdown_heading(trimmed, cfg) {
            return heading;
        }
        if let Some(item) = list_item(line, trimmed, cfg) {
            return item;
        }
    }
    if trimmed.is_empty() {
        return LineClass::Blank;
    }
    LineClass::Plain
}

fn is_table_row(trimmed: &str) -> bool {
    if !trimmed.contains('|') {
        return false;
    }
    let columns = trimmed
        .split('|')
        .filter(|col| !col.trim().is_empty())
        .count();
    columns >= 2
}

fn markdown_heading(trimmed: &str, cfg: &DocumentStructureConfig) -> Option<LineClass> {
    let hashes = trimmed.chars().take_while(|&c| c == '#').count();
    if hashes == 0 || hashes > 6 {
        return None;
    }
    let rest = &trimmed[hashes..];
    let body = rest.strip_prefix(' ')?;
    let level = hashes as u8;
    if level < cfg.min_header_level || level > cfg.max_header_level {
        return None;
    }
    Some(LineClass::Heading {
        level,
        text: body.trim().to_string(),
    })
}

fn html_heading(trimmed: &str, cfg: &DocumentStructureConfig) -> Option<LineClass> {
    let lower = trimmed.to_ascii_lowercase();
    for level in 1..=6u8 {
        let tag = format!("h{level}");
        if lower.starts_with(&format!("<{tag}")) {
            if level < cfg.min_header_level || level > cfg.max_header_level {
                return None;
            }
            let text = html_tag_body(trimmed, &tag)?;
            return Some(LineClass::Heading { level, text });
        }
    }
    None
}

/// Extract `inner` from `<tag ...>inner</tag>`; tolerates a missing closer.
fn html_tag_body(trimmed: &str, tag: &str) -> Option<String> {
    let open_end = trimmed.find('>')?;
    let rest = &trimmed[open_end + 1..];
    let close = format!("</{tag}>");
    let inner = match rest.to_ascii_lowercase().find(&close) {
        Some(pos) => &rest[..pos],
        None => rest,
    };
    let inner = inner.trim();
    if inner.is_empty() {
        None
    } else {
        Some(inner.to_string())
    }
}

fn list_item(line: &str, trimmed: &str, cfg: &DocumentStructureConfig) -> Option<LineClass> {
    let indent_spaces = leading_width(line, cfg.tab_width);
    for marker in ['-', '*', '+'] {
        if let Some(rest) = trimmed.strip_prefix(marker) {
            if let Some(body) = rest.strip_prefix(' ') {
                return Some(LineClass::ListItem {
                    ordered: false,
                    indent_spaces,
                    text: body.trim().to_string(),
                });
            }
        }
    }
    let digits = trimmed.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 {
        let rest = &trimmed[digits..];
        if let Some(body) = rest.strip_prefix('.').and_then(|r| r.strip_prefix(' ')) {
            return Some(LineClass::ListItem {
                ordered: true,
                indent_spaces,
                text: body.trim().to_string(),
            });
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> DocumentStructureConfig {
        DocumentStructureConfig::default()
    }

    #[test]
    fn classification_priority_fence_beats_list() {
        // A fence line is a fence even though it has no text after it.
        assert_eq!(classify("```rust", &cfg()), LineClass::Fence);
        assert_eq!(classify("~~~", &cfg()), LineClass::Fence);
    }

    #[test]
    fn table_rows_need_two_columns() {
        assert_eq!(classify("| 名前 | 値 |", &cfg()), LineClass::TableRow);
        assert_eq!(classify("a | b", &cfg()), LineClass::TableRow);
        assert_eq!(classify("| 単独 |", &cfg()), LineClass::Plain);
    }

    #[test]
    fn headings_require_a_space_after_hashes() {
        assert_eq!(
            classify("## 設計方針", &cfg()),
            LineClass::Heading {
                level: 2,
                text: "設計方針".into()
            }
        );
        assert_eq!(classify("#なし", &cfg()), LineClass::Plain);
        assert_eq!(classify("####### deep", &cfg()), LineClass::Plain);
    }

    #[test]
    fn heading_range_is_clipped() {
        let mut c = cfg();
        c.max_header_level = 2;
        assert_eq!(classify("### 深い見出し", &c), LineClass::Plain);
    }

    #[test]
    fn list_items_carry_indent_and_order() {
        assert_eq!(
            classify("  - 箇条書き", &cfg()),
            LineClass::ListItem {
                ordered: false,
                indent_spaces: 2,
                text: "箇条書き".into()
            }
        );
        assert_eq!(
            classify("3. 三番目", &cfg()),
            LineClass::ListItem {
                ordered: true,
                indent_spaces: 0,
                text: "三番目".into()
            }
        );
        assert_eq!(classify("-ダッシュ", &cfg()), LineClass::Plain);
    }

    #[test]
    fn tabs_expand_to_tab_width() {
        assert_eq!(leading_width("\t\t- x", 2), 4);
    }

    #[test]
    fn html_dialect_is_opt_in() {
        let mut c = cfg();
        assert_eq!(classify("<h2>概要</h2>", &c), LineClass::Plain);
        c.detect_html = true;
        assert_eq!(
            classify("<h2>概要</h2>", &c),
            LineClass::Heading {
                level: 2,
                text: "概要".into()
            }
        );
        assert_eq!(
            classify("<li>項目</li>", &c),
            LineClass::ListItem {
                ordered: false,
                indent_spaces: 0,
                text: "項目".into()
            }
        );
        assert_eq!(classify("<pre>", &c), LineClass::PreOpen);
        assert_eq!(classify("</pre>", &c), LineClass::PreClose);
    }

    #[test]
    fn markdown_rules_can_be_disabled() {
        let mut c = cfg();
        c.detect_markdown = false;
        assert_eq!(classify("# 見出し", &c), LineClass::Plain);
        assert_eq!(classify("- 箇条書き", &c), LineClass::Plain);
    }
}
