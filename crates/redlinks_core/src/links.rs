use std::collections::{BTreeMap, BTreeSet};

use anyhow::Result;

use crate::category::PageId;
use crate::resolver::{RedLink, rank_target_sets};

/// Structured link table access for the replica-backed variant.
pub trait LinkStore {
    /// `(source page, target title)` for every article link from `pages`
    /// whose target page does not exist.
    fn links_for_pages(&mut self, pages: &[PageId]) -> Result<Vec<(PageId, String)>>;

    /// Red-link targets ranked by number of distinct linking pages.
    fn ranked_red_links(&mut self, pages: &[PageId]) -> Result<Vec<RedLink>> {
        let rows = self.links_for_pages(pages)?;
        Ok(rank_link_rows(rows))
    }
}

/// Aggregate raw `(page, target)` rows the same way per-page wikitext results are.
pub fn rank_link_rows(rows: impl IntoIterator<Item = (PageId, String)>) -> Vec<RedLink> {
    let mut by_page: BTreeMap<PageId, BTreeSet<String>> = BTreeMap::new();
    for (page, target) in rows {
        by_page.entry(page).or_default().insert(target);
    }
    rank_target_sets(by_page.values())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MemoryLinks {
        rows: Vec<(PageId, String)>,
    }

    impl LinkStore for MemoryLinks {
        fn links_for_pages(&mut self, pages: &[PageId]) -> Result<Vec<(PageId, String)>> {
            Ok(self
                .rows
                .iter()
                .filter(|(page, _)| pages.contains(page))
                .cloned()
                .collect())
        }
    }

    fn row(page: i64, target: &str) -> (PageId, String) {
        (PageId(page), target.to_string())
    }

    #[test]
    fn default_ranking_counts_distinct_pages() {
        let mut store = MemoryLinks {
            rows: vec![
                row(1, "Foo"),
                row(1, "Foo"),
                row(2, "Foo"),
                row(2, "Bar"),
                row(3, "Unrelated"),
            ],
        };

        let ranked = store
            .ranked_red_links(&[PageId(1), PageId(2)])
            .expect("ranked");
        assert_eq!(
            ranked,
            vec![
                RedLink {
                    title: "Foo".to_string(),
                    count: 2
                },
                RedLink {
                    title: "Bar".to_string(),
                    count: 1
                },
            ]
        );
    }

    #[test]
    fn structured_rows_still_drop_empty_and_fragment_targets() {
        let ranked = rank_link_rows(vec![row(1, ""), row(1, "A#b"), row(2, "Kept: a subtitle")]);
        assert_eq!(
            ranked,
            vec![RedLink {
                title: "Kept: a subtitle".to_string(),
                count: 1
            }]
        );
    }
}
