use anyhow::{Context, Result};

use crate::resolver::{RedLink, RedLinkReport};

/// One `* <count> [[<title>]]` line per red link, ready for a wiki list.
pub fn render_text(red_links: &[RedLink]) -> String {
    let mut output = String::new();
    for link in red_links {
        output.push_str(&format!("* {} [[{}]]\n", link.count, link.title));
    }
    output
}

pub fn render_json(report: &RedLinkReport) -> Result<String> {
    serde_json::to_string_pretty(report).context("failed to serialize red-link report")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RedLinkReport {
        RedLinkReport {
            category: "Birds".to_string(),
            member_pages: 3,
            pages_with_red_links: Some(2),
            skipped_pages: 0,
            red_links: vec![
                RedLink {
                    title: "Great auk".to_string(),
                    count: 2,
                },
                RedLink {
                    title: "Moa".to_string(),
                    count: 1,
                },
            ],
        }
    }

    #[test]
    fn text_lines_follow_wiki_list_format() {
        assert_eq!(
            render_text(&sample().red_links),
            "* 2 [[Great auk]]\n* 1 [[Moa]]\n"
        );
        assert_eq!(render_text(&[]), "");
    }

    #[test]
    fn json_includes_counts_and_summary() {
        let rendered = render_json(&sample()).expect("json");
        let value: serde_json::Value = serde_json::from_str(&rendered).expect("parse");
        assert_eq!(value["category"], "Birds");
        assert_eq!(value["red_links"][0]["title"], "Great auk");
        assert_eq!(value["red_links"][1]["count"], 1);
    }
}
