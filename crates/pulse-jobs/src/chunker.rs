//! Sentence-aware text chunking.

/// Split `text` into chunks of roughly `chunk_size` characters.
///
/// Each window is extended to the next sentence end (a period, optionally
/// followed by a closing quote or bracket, then whitespace or the end of the
/// text) so sentences are not cut. The extension looks at most another
/// `chunk_size` characters ahead; without a sentence end in that range the
/// window is cut at `chunk_size`, so no chunk exceeds `2 * chunk_size`
/// characters. Chunks are trimmed and empty chunks are dropped.
pub fn chunk_text(text: &str, chunk_size: usize) -> Vec<String> {
    let chunk_size = chunk_size.max(1);
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < text.len() {
        let end = match text[start..].char_indices().nth(chunk_size) {
            None => text.len(),
            Some((offset, _)) => {
                let tentative = start + offset;
                sentence_end_from(text, tentative, chunk_size).unwrap_or(tentative)
            }
        };
        let chunk = text[start..end].trim();
        if !chunk.is_empty() {
            chunks.push(chunk.to_string());
        }
        start = end;
    }
    chunks
}

/// Byte index just past the first sentence end starting at `from`'s
/// preceding character and within `reach` characters after `from`.
fn sentence_end_from(text: &str, from: usize, reach: usize) -> Option<usize> {
    let search_start = text[..from]
        .char_indices()
        .next_back()
        .map(|(i, _)| i)
        .unwrap_or(0);
    let mut chars = text[search_start..].char_indices().take(reach + 1).peekable();
    while let Some((offset, c)) = chars.next() {
        if c != '.' {
            continue;
        }
        let mut end = search_start + offset + 1;
        if let Some(&(closer_offset, closer)) = chars.peek() {
            if is_closer(closer) {
                end = search_start + closer_offset + closer.len_utf8();
                chars.next();
            }
        }
        match text[end..].chars().next() {
            None => return Some(end),
            Some(next) if next.is_whitespace() => return Some(end),
            Some(_) => {}
        }
    }
    None
}

fn is_closer(c: char) -> bool {
    matches!(c, '"' | '\'' | ')' | ']' | '\u{201d}' | '\u{2019}')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn squash(s: &str) -> String {
        s.chars().filter(|c| !c.is_whitespace()).collect()
    }

    #[test]
    fn short_text_is_one_chunk() {
        assert_eq!(chunk_text("  Hello there.  ", 1000), vec!["Hello there."]);
    }

    #[test]
    fn empty_and_blank_text_have_no_chunks() {
        assert!(chunk_text("", 10).is_empty());
        assert!(chunk_text(" \n\t ", 10).is_empty());
    }

    #[test]
    fn window_extends_to_sentence_end() {
        let text = "Alice approved the plan. Bob disagreed. Carol left.";
        let chunks = chunk_text(text, 15);
        assert_eq!(
            chunks,
            vec!["Alice approved the plan.", "Bob disagreed.", "Carol left."]
        );
    }

    #[test]
    fn decimal_points_do_not_end_sentences() {
        let text = "Revenue grew by a lot, 3.5 percent. Costs fell.";
        let chunks = chunk_text(text, 20);
        assert_eq!(chunks[0], "Revenue grew by a lot, 3.5 percent.");
    }

    #[test]
    fn text_without_periods_is_cut_at_window_size() {
        let text = "word ".repeat(1000);
        let chunks = chunk_text(&text, 1000);
        assert_eq!(chunks.len(), 5);
        assert!(chunks.iter().all(|c| c.chars().count() <= 1000));
        assert_eq!(squash(&chunks.concat()), squash(&text));
    }

    #[test]
    fn distant_sentence_end_does_not_stretch_chunk() {
        let text = format!("{}. tail", "x".repeat(50));
        let chunks = chunk_text(&text, 10);
        assert_eq!(chunks[0], "x".repeat(10));
        assert!(chunks.iter().all(|c| c.chars().count() <= 20));
        assert_eq!(squash(&chunks.concat()), squash(&text));
    }

    #[test]
    fn quoted_sentence_end_is_a_boundary() {
        let text = "He said \"stop.\" ".repeat(300);
        let chunks = chunk_text(&text, 1000);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.chars().count() <= 2000));
        assert!(chunks[0].ends_with(".\""));
        assert_eq!(squash(&chunks.concat()), squash(&text));
    }

    #[test]
    fn window_ending_on_period_keeps_boundary() {
        let chunks = chunk_text("Abc. Defgh.", 4);
        assert_eq!(chunks, vec!["Abc.", "Defgh."]);
    }

    #[test]
    fn multibyte_text_is_split_on_char_boundaries() {
        let text = "Ünïcödé wörds hère. Ëvén möré. Fïnål.";
        let chunks = chunk_text(text, 3);
        assert_eq!(squash(&chunks.concat()), squash(text));
        assert!(chunks.iter().all(|c| !c.is_empty()));
    }

    #[test]
    fn concatenation_reproduces_text() {
        let text = "Event on Jan 5, 2024. Alice approved the plan.\n\nThe team \
                    met again. Budget v2.1 was reviewed. Nothing else happened";
        for size in [1, 7, 20, 64, 1000] {
            let chunks = chunk_text(text, size);
            assert_eq!(squash(&chunks.concat()), squash(text), "size {}", size);
            assert!(chunks.iter().all(|c| !c.is_empty()));
        }
    }

    #[test]
    fn zero_chunk_size_behaves_like_one() {
        assert_eq!(chunk_text("A. B.", 0), vec!["A.", "B."]);
    }
}
