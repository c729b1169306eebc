/// Turn a raw long description into readable text (Debian Policy 5.6.13).
///
/// The first line repeats the summary and is dropped. A lone `.` separates
/// paragraphs, lines indented by two or more spaces are kept verbatim on their
/// own line, and lines indented by one space continue the current paragraph.
pub fn format_description(raw: &str) -> String {
    let mut desc = String::new();

    for raw_line in raw.split('\n').skip(1) {
        if raw_line.trim() == "." {
            if !desc.ends_with('\n') {
                desc.push_str("\n\n");
            }
            continue;
        }

        if let Some(verbatim) = raw_line.strip_prefix("  ") {
            if !desc.ends_with('\n') {
                desc.push('\n');
            }
            desc.push_str(verbatim);
            desc.push('\n');
        } else if let Some(cont) = raw_line.strip_prefix(' ') {
            // Leading space only goes away at the start of a paragraph
            if desc.is_empty() || desc.ends_with('\n') {
                desc.push_str(cont);
            } else {
                desc.push_str(raw_line);
            }
        } else {
            desc.push_str(raw_line);
        }
    }

    desc
}

/// Decode and format a description, or explain why it can't be shown
pub(crate) fn decode_description(pkg: &str, raw: &[u8]) -> String {
    match std::str::from_utf8(raw) {
        Ok(text) => format_description(text),
        Err(e) => format!(
            "Invalid unicode in description for '{}' ({}). Please report.",
            pkg, e
        ),
    }
}
