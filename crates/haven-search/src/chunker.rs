//! Paragraph-based text chunking

/// Default maximum chunk length in characters
pub const DEFAULT_MAX_CHARS: usize = 1000;

/// Split `text` into chunks of at most `max_chars` characters.
///
/// Paragraphs (separated by blank lines) are packed greedily into chunks.
/// A paragraph longer than `max_chars` is split on whitespace; a single word
/// longer than `max_chars` becomes its own chunk.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();

    for paragraph in paragraphs(text) {
        if char_len(&paragraph) > max_chars {
            flush(&mut current, &mut chunks);
            split_long(&paragraph, max_chars, &mut chunks);
            continue;
        }

        let joined_len = if current.is_empty() {
            char_len(&paragraph)
        } else {
            char_len(&current) + 2 + char_len(&paragraph)
        };
        if joined_len > max_chars {
            flush(&mut current, &mut chunks);
        }
        if !current.is_empty() {
            current.push_str("\n\n");
        }
        current.push_str(&paragraph);
    }

    flush(&mut current, &mut chunks);
    chunks
}

/// Paragraphs with inner line breaks collapsed to single spaces
fn paragraphs(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut lines: Vec<&str> = Vec::new();

    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            if !lines.is_empty() {
                out.push(lines.join(" "));
                lines.clear();
            }
        } else {
            lines.push(trimmed);
        }
    }
    if !lines.is_empty() {
        out.push(lines.join(" "));
    }
    out
}

fn split_long(paragraph: &str, max_chars: usize, chunks: &mut Vec<String>) {
    let mut current = String::new();
    for word in paragraph.split_whitespace() {
        let joined_len = if current.is_empty() {
            char_len(word)
        } else {
            char_len(&current) + 1 + char_len(word)
        };
        if joined_len > max_chars {
            flush(&mut current, chunks);
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    flush(&mut current, chunks);
}

fn flush(current: &mut String, chunks: &mut Vec<String>) {
    if !current.is_empty() {
        chunks.push(std::mem::take(current));
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}
