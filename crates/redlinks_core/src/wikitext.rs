/// Raw targets of every internal wikilink in `content`, in source order.
///
/// The target is the text before the first `|`, kept exactly as written.
/// Nested links (`[[File:A.png|thumb|see [[Foo]]]]`) yield both targets.
/// HTML comments and `<nowiki>` spans are inert. An unterminated `[[` is
/// plain text.
pub fn extract_link_targets(content: &str) -> Vec<String> {
    let cleaned = strip_inert_spans(content);
    let bytes = cleaned.as_bytes();
    let mut open: Vec<usize> = Vec::new();
    let mut found: Vec<(usize, String)> = Vec::new();
    let mut cursor = 0usize;

    while cursor + 1 < bytes.len() {
        if bytes[cursor] == b'[' && bytes[cursor + 1] == b'[' {
            // `[[[Foo]]]` is a literal bracket around `[[Foo]]`.
            if bytes.get(cursor + 2) == Some(&b'[') {
                cursor += 1;
                continue;
            }
            open.push(cursor + 2);
            cursor += 2;
            continue;
        }
        if bytes[cursor] == b']' && bytes[cursor + 1] == b']' {
            if let Some(start) = open.pop() {
                if let Some(target) = link_target(&cleaned[start..cursor]) {
                    found.push((start, target.to_string()));
                }
                cursor += 2;
                continue;
            }
        }
        cursor += 1;
    }

    found.sort_by_key(|(start, _)| *start);
    found.into_iter().map(|(_, target)| target).collect()
}

/// Split `Page#Section` into its page part and fragment.
pub fn split_fragment(target: &str) -> (&str, Option<&str>) {
    match target.split_once('#') {
        Some((page, fragment)) => (page, Some(fragment)),
        None => (target, None),
    }
}

fn link_target(inner: &str) -> Option<&str> {
    let target = inner.split('|').next().unwrap_or("");
    let is_title = !target
        .chars()
        .any(|ch| matches!(ch, '\n' | '[' | ']' | '{' | '}' | '<' | '>'));
    is_title.then_some(target)
}

fn strip_inert_spans(content: &str) -> String {
    let mut output = String::with_capacity(content.len());
    let mut rest = content;

    loop {
        let comment = rest.find("<!--");
        let nowiki = find_ascii_case_insensitive(rest, "<nowiki");
        let (start, is_comment) = match (comment, nowiki) {
            (Some(c), Some(n)) if c < n => (c, true),
            (_, Some(n)) => (n, false),
            (Some(c), None) => (c, true),
            (None, None) => break,
        };
        output.push_str(&rest[..start]);
        let after = &rest[start..];

        let skip = if is_comment {
            // An unterminated comment runs to the end of the page.
            after.find("-->").map(|end| end + 3).unwrap_or(after.len())
        } else {
            match after.find('>') {
                Some(tag_end) if after[..tag_end].ends_with('/') => tag_end + 1,
                Some(tag_end) => find_ascii_case_insensitive(after, "</nowiki>")
                    .map(|close| close + "</nowiki>".len())
                    .unwrap_or(tag_end + 1),
                None => after.len(),
            }
        };
        rest = &after[skip..];
    }

    output.push_str(rest);
    output
}

fn find_ascii_case_insensitive(haystack: &str, needle: &str) -> Option<usize> {
    let needle = needle.as_bytes();
    haystack
        .as_bytes()
        .windows(needle.len())
        .position(|window| window.eq_ignore_ascii_case(needle))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_targets_before_pipe_and_keeps_raw_text() {
        let links = extract_link_targets("[[Alpha|label]] and [[ Beta ]] then [[Gamma#History]]");
        assert_eq!(links, vec!["Alpha", " Beta ", "Gamma#History"]);
    }

    #[test]
    fn extracts_nested_links_in_source_order() {
        let links =
            extract_link_targets("[[File:Fish.png|thumb|A [[Fish]] near [[Reef|reefs]]]] [[Dog]]");
        assert_eq!(links, vec!["File:Fish.png", "Fish", "Reef", "Dog"]);
    }

    #[test]
    fn ignores_comments_and_nowiki() {
        let content = "<!-- [[Hidden]] --> <nowiki>[[Literal]]</nowiki> <NOWIKI/>[[Shown]]";
        assert_eq!(extract_link_targets(content), vec!["Shown"]);
    }

    #[test]
    fn unterminated_comment_hides_rest_of_page() {
        assert_eq!(extract_link_targets("[[A]] <!-- [[B]]"), vec!["A"]);
    }

    #[test]
    fn tolerates_malformed_markup() {
        assert_eq!(extract_link_targets("[[Open but never closed"), Vec::<String>::new());
        assert_eq!(extract_link_targets("stray ]] [[Ok]]"), vec!["Ok"]);
        assert_eq!(extract_link_targets("[[[Bracketed]]]"), vec!["Bracketed"]);
        assert_eq!(extract_link_targets("[[Multi\nline]] [[{{PAGENAME}}]]"), Vec::<String>::new());
        assert_eq!(extract_link_targets("[[ stray [[Inner]] ]]"), vec!["Inner"]);
    }

    #[test]
    fn keeps_empty_targets_for_later_accounting() {
        assert_eq!(extract_link_targets("[[]] [[|label]]"), vec!["", ""]);
    }

    #[test]
    fn splits_fragments() {
        assert_eq!(split_fragment("Foo#Bar"), ("Foo", Some("Bar")));
        assert_eq!(split_fragment("#Local"), ("", Some("Local")));
        assert_eq!(split_fragment("Foo"), ("Foo", None));
    }
}
