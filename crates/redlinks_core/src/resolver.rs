use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::category::CategoryClient;
use crate::dump::{DumpError, DumpReader};
use crate::title::normalize_title;
use crate::wikitext::{extract_link_targets, split_fragment};

/// Page title -> distinct raw red-link targets found on that page.
pub type RedLinksByPage = BTreeMap<String, BTreeSet<String>>;

/// How `Target#Section` links are treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum FragmentPolicy {
    /// Fragment links never become candidates.
    #[default]
    Exclude,
    /// Count `Target#Section` as a link to `Target`.
    FoldIntoPage,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ResolveOptions {
    pub fragments: FragmentPolicy,
    pub max_depth: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RedLink {
    pub title: String,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RedLinkReport {
    pub category: String,
    pub member_pages: usize,
    /// Unknown when the data store pre-aggregates counts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pages_with_red_links: Option<usize>,
    pub skipped_pages: usize,
    pub red_links: Vec<RedLink>,
}

/// Per-target page counts in first-seen order.
#[derive(Debug, Default)]
pub struct LinkCounter {
    counts: Vec<(String, usize)>,
    index: HashMap<String, usize>,
}

impl LinkCounter {
    pub fn add(&mut self, target: &str, pages: usize) {
        match self.index.get(target) {
            Some(&slot) => self.counts[slot].1 += pages,
            None => {
                self.index.insert(target.to_string(), self.counts.len());
                self.counts.push((target.to_string(), pages));
            }
        }
    }

    /// Drop the empty title and fragment targets, then sort by count
    /// descending. Equal counts keep first-seen order.
    pub fn into_ranked(self) -> Vec<RedLink> {
        let mut ranked = Vec::with_capacity(self.counts.len());
        for (title, count) in self.counts {
            if normalize_title(&title).is_empty() {
                warn!(count, title = ?title, "dropping empty red-link title");
                continue;
            }
            if title.contains('#') {
                debug!(title = %title, count, "dropping fragment red link");
                continue;
            }
            ranked.push(RedLink { title, count });
        }
        ranked.sort_by(|left, right| right.count.cmp(&left.count));
        ranked
    }
}

/// Count each target once per page and rank the result.
pub fn rank_red_links(red_links: &RedLinksByPage) -> Vec<RedLink> {
    rank_target_sets(red_links.values())
}

pub fn rank_target_sets<'a>(sets: impl IntoIterator<Item = &'a BTreeSet<String>>) -> Vec<RedLink> {
    let mut counter = LinkCounter::default();
    for targets in sets {
        for target in targets {
            counter.add(target, 1);
        }
    }
    counter.into_ranked()
}

/// Raw targets on one page whose normalized form is not a known title.
/// Namespace-qualified targets are skipped.
pub fn red_links_in_page(
    text: &str,
    known: &HashSet<String>,
    fragments: FragmentPolicy,
) -> BTreeSet<String> {
    let mut red = BTreeSet::new();
    for target in extract_link_targets(text) {
        if target.contains(':') {
            continue;
        }
        let candidate = match (fragments, split_fragment(&target)) {
            (_, (page, None)) => page,
            (FragmentPolicy::Exclude, (_, Some(_))) => continue,
            // `[[#Section]]` points at the same page.
            (FragmentPolicy::FoldIntoPage, (page, Some(_))) if page.trim().is_empty() => continue,
            (FragmentPolicy::FoldIntoPage, (page, Some(_))) => page,
        };
        if !known.contains(&normalize_title(candidate)) {
            red.insert(candidate.to_string());
        }
    }
    red
}

/// One full pass over the dump collecting normalized article titles.
pub fn known_titles<D: DumpReader>(dump: &D) -> Result<HashSet<String>> {
    info!("gathering titles in dump");
    let mut titles = HashSet::new();
    for page in dump.titles().context("failed to start title pass")? {
        match page {
            Ok(page) if page.is_article() => {
                titles.insert(normalize_title(&page.title));
            }
            Ok(_) => {}
            Err(error) => skip_or_fail(error)?,
        }
    }
    info!(titles = titles.len(), "finished gathering titles");
    Ok(titles)
}

/// Second dump pass: red links of every page whose title is in `members`.
/// Returns the per-page map and the number of skipped malformed pages.
pub fn find_red_links<D: DumpReader>(
    dump: &D,
    members: &BTreeSet<String>,
    known: &HashSet<String>,
    fragments: FragmentPolicy,
) -> Result<(RedLinksByPage, usize)> {
    let mut red_links = RedLinksByPage::new();
    let mut skipped = 0usize;

    for page in dump.pages().context("failed to start page pass")? {
        let page = match page {
            Ok(page) => page,
            Err(error) => {
                skip_or_fail(error)?;
                skipped += 1;
                continue;
            }
        };
        if !members.contains(&page.title) {
            continue;
        }
        let red = red_links_in_page(&page.text, known, fragments);
        if !red.is_empty() {
            info!(page = %page.title, count = red.len(), "found red links");
            red_links.insert(page.title, red);
        }
    }

    Ok((red_links, skipped))
}

/// Dump-backed pipeline: category closure, title index, per-page red links, ranking.
pub fn find_dump_red_links<D, C>(
    dump: &D,
    categories: &mut C,
    category: &str,
    options: &ResolveOptions,
) -> Result<RedLinkReport>
where
    D: DumpReader,
    C: CategoryClient,
{
    let known = known_titles(dump)?;
    let closure = categories.closure(category, options.max_depth)?;
    let members = closure.titles();
    let (red_links, skipped_pages) = find_red_links(dump, &members, &known, options.fragments)?;

    Ok(RedLinkReport {
        category: closure.root,
        member_pages: members.len(),
        pages_with_red_links: Some(red_links.len()),
        skipped_pages,
        red_links: rank_red_links(&red_links),
    })
}

fn skip_or_fail(error: DumpError) -> Result<()> {
    if error.is_recoverable() {
        warn!(%error, "skipping page");
        Ok(())
    } else {
        Err(error).context("failed to read dump")
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::*;
    use crate::category::tests::MockCategories;
    use crate::dump::{Page, XmlDump};

    struct MemoryDump {
        records: Vec<Result<Page, String>>,
    }

    impl MemoryDump {
        fn new(pages: &[(&str, i32, &str)]) -> Self {
            Self {
                records: pages
                    .iter()
                    .map(|(title, namespace, text)| {
                        Ok(Page {
                            title: title.to_string(),
                            namespace: *namespace,
                            text: text.to_string(),
                        })
                    })
                    .collect(),
            }
        }

        fn records(&self) -> std::vec::IntoIter<Result<Page, DumpError>> {
            self.records
                .iter()
                .map(|record| match record {
                    Ok(page) => Ok(page.clone()),
                    Err(reason) => Err(DumpError::Page {
                        title: None,
                        reason: reason.clone(),
                    }),
                })
                .collect::<Vec<_>>()
                .into_iter()
        }
    }

    impl DumpReader for MemoryDump {
        type Pages = std::vec::IntoIter<Result<Page, DumpError>>;

        fn titles(&self) -> Result<Self::Pages, DumpError> {
            Ok(self.records())
        }

        fn pages(&self) -> Result<Self::Pages, DumpError> {
            Ok(self.records())
        }
    }

    fn known(titles: &[&str]) -> HashSet<String> {
        titles.iter().map(|title| normalize_title(title)).collect()
    }

    fn page_map(entries: &[(&str, &[&str])]) -> RedLinksByPage {
        entries
            .iter()
            .map(|(page, targets)| {
                (
                    page.to_string(),
                    targets.iter().map(|target| target.to_string()).collect(),
                )
            })
            .collect()
    }

    #[test]
    fn red_links_skip_known_and_namespaced_targets() {
        let red = red_links_in_page(
            "[[Dog]] [[Fish]] [[File:Fish.png]]",
            &known(&["dog", "cat"]),
            FragmentPolicy::Exclude,
        );
        assert_eq!(red, BTreeSet::from(["Fish".to_string()]));
    }

    #[test]
    fn red_links_are_deduplicated_per_page_and_keep_original_text() {
        let red = red_links_in_page(
            "[[ Fish ]] [[ Fish ]] [[fish|the fish]] [[CAT]]",
            &known(&["cat"]),
            FragmentPolicy::Exclude,
        );
        assert_eq!(
            red,
            BTreeSet::from([" Fish ".to_string(), "fish".to_string()])
        );
    }

    #[test]
    fn fragment_policy_controls_section_links() {
        let text = "[[Foo#History]] [[Dog#Care]] [[#Local]]";
        let known = known(&["dog"]);

        assert!(red_links_in_page(text, &known, FragmentPolicy::Exclude).is_empty());
        assert_eq!(
            red_links_in_page(text, &known, FragmentPolicy::FoldIntoPage),
            BTreeSet::from(["Foo".to_string()])
        );
    }

    #[test]
    fn aggregation_counts_distinct_pages_descending() {
        let ranked = rank_red_links(&page_map(&[
            ("Page one", &["Foo"]),
            ("Page two", &["Foo", "Bar"]),
        ]));
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
    fn fragment_targets_never_reach_the_report() {
        let ranked = rank_red_links(&page_map(&[("Only", &["Foo#Section"])]));
        assert!(ranked.is_empty());
    }

    #[test]
    fn empty_target_is_dropped_regardless_of_count() {
        let ranked = rank_red_links(&page_map(&[
            ("A", &["", "Real"]),
            ("B", &[""]),
            ("C", &[""]),
        ]));
        assert_eq!(
            ranked,
            vec![RedLink {
                title: "Real".to_string(),
                count: 1
            }]
        );
    }

    #[test]
    fn whitespace_only_target_counts_as_empty() {
        let mut red_links = RedLinksByPage::new();
        red_links.insert(
            "A".to_string(),
            red_links_in_page("[[ ]] [[Real]]", &known(&[]), FragmentPolicy::Exclude),
        );
        red_links.insert("B".to_string(), BTreeSet::from(["\t".to_string()]));

        assert_eq!(
            rank_red_links(&red_links),
            vec![RedLink {
                title: "Real".to_string(),
                count: 1
            }]
        );
    }

    #[test]
    fn ties_keep_first_seen_order() {
        let mut counter = LinkCounter::default();
        for target in ["Zeta", "Alpha", "Mid", "Alpha"] {
            counter.add(target, 1);
        }
        let titles: Vec<String> = counter
            .into_ranked()
            .into_iter()
            .map(|link| link.title)
            .collect();
        assert_eq!(titles, vec!["Alpha", "Zeta", "Mid"]);
    }

    #[test]
    fn known_titles_only_index_articles() {
        let dump = MemoryDump::new(&[
            ("Dog", 0, ""),
            ("Category:Animals", 14, ""),
            ("Talk:Dog", 1, ""),
        ]);
        assert_eq!(known_titles(&dump).expect("titles"), known(&["dog"]));
    }

    #[test]
    fn malformed_pages_are_skipped_and_counted() {
        let mut dump = MemoryDump::new(&[("Good", 0, "[[Nowhere]]")]);
        dump.records.insert(0, Err("undecodable text".to_string()));

        let members = BTreeSet::from(["Good".to_string()]);
        let known = known_titles(&dump).expect("titles");
        let (red_links, skipped) =
            find_red_links(&dump, &members, &known, FragmentPolicy::Exclude).expect("red links");
        assert_eq!(skipped, 1);
        assert_eq!(red_links, page_map(&[("Good", &["Nowhere"])]));
    }

    #[test]
    fn only_category_members_are_scanned() {
        let dump = MemoryDump::new(&[
            ("Inside", 0, "[[Ghost]]"),
            ("Outside", 0, "[[Phantom]]"),
        ]);
        let mut categories = MockCategories::default().with("Things", &[(1, "Inside")], &[]);

        let report = find_dump_red_links(
            &dump,
            &mut categories,
            "Things",
            &ResolveOptions::default(),
        )
        .expect("report");
        assert_eq!(report.member_pages, 1);
        assert_eq!(
            report.red_links,
            vec![RedLink {
                title: "Ghost".to_string(),
                count: 1
            }]
        );
    }

    #[test]
    fn end_to_end_from_xml_dump() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("dump.xml");
        fs::write(
            &path,
            r#"<mediawiki>
  <page><title>P0</title><ns>0</ns><revision><text>Links to [[P1]] and [[Missing]] and [[File:X.png]].</text></revision></page>
  <page><title>P1</title><ns>0</ns><revision><text>Plain.</text></revision></page>
</mediawiki>"#,
        )
        .expect("write dump");

        let dump = XmlDump::open(&path).expect("open dump");
        let mut categories = MockCategories::default().with("Target", &[(1, "P0")], &[]);
        let report = find_dump_red_links(
            &dump,
            &mut categories,
            "Category:Target",
            &ResolveOptions::default(),
        )
        .expect("report");

        assert_eq!(
            crate::report::render_text(&report.red_links),
            "* 1 [[Missing]]\n"
        );
        assert_eq!(report.pages_with_red_links, Some(1));
        assert_eq!(report.skipped_pages, 0);
    }
}
