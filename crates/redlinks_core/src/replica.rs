use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::category::{CategoryClient, CategoryMembers, MemberPage, PageId};
use crate::links::LinkStore;
use crate::resolver::{LinkCounter, RedLink, RedLinkReport};
use crate::title::{NS_CATEGORY, NS_MAIN, category_key, db_title, display_title};

/// Maximum number of page ids bound into a single `IN (...)` list.
pub const PAGE_BATCH_SIZE: usize = 500;

pub(crate) const CATEGORY_MEMBERS_SQL: &str = "SELECT page_id, page_namespace, page_title \
     FROM page JOIN categorylinks ON cl_from = page_id \
     WHERE cl_to = ? AND page_namespace IN (0, 14) \
     ORDER BY page_namespace, page_title";

/// Article links from the given pages whose target has no page row.
pub(crate) fn red_link_rows_sql(pages: usize) -> String {
    format!(
        "SELECT pl_from, lt_title \
         FROM pagelinks \
         JOIN linktarget ON lt_id = pl_target_id \
         LEFT JOIN page ON page_namespace = lt_namespace AND page_title = lt_title \
         WHERE lt_namespace = 0 AND page_id IS NULL AND pl_from IN ({})",
        placeholders(pages)
    )
}

/// Same join as [`red_link_rows_sql`], aggregated to distinct linking pages.
pub(crate) fn ranked_red_links_sql(pages: usize) -> String {
    format!(
        "SELECT lt_title, COUNT(DISTINCT pl_from) AS links \
         FROM pagelinks \
         JOIN linktarget ON lt_id = pl_target_id \
         LEFT JOIN page ON page_namespace = lt_namespace AND page_title = lt_title \
         WHERE lt_namespace = 0 AND page_id IS NULL AND pl_from IN ({}) \
         GROUP BY lt_title \
         ORDER BY links DESC, lt_title",
        placeholders(pages)
    )
}

pub(crate) fn placeholders(count: usize) -> String {
    vec!["?"; count.max(1)].join(", ")
}

/// Sorts raw `(id, namespace, db title)` rows from [`CATEGORY_MEMBERS_SQL`].
pub(crate) fn members_from_rows(
    category: &str,
    rows: impl IntoIterator<Item = (i64, i32, String)>,
) -> CategoryMembers {
    let mut members = CategoryMembers::default();
    for (id, namespace, title) in rows {
        match namespace {
            NS_MAIN => members.pages.push(MemberPage::new(id, display_title(&title))),
            NS_CATEGORY => members.subcategories.push(display_title(&title)),
            other => debug!(category, namespace = other, title = %title, "ignoring member"),
        }
    }
    members
}

/// Merge `(db title, distinct linking pages)` rows from [`ranked_red_links_sql`].
pub(crate) fn rank_grouped_rows(rows: impl IntoIterator<Item = (String, usize)>) -> Vec<RedLink> {
    let mut counter = LinkCounter::default();
    for (title, links) in rows {
        counter.add(&display_title(&title), links);
    }
    counter.into_ranked()
}

/// `cl_to` value for a category name given with or without prefix.
pub(crate) fn category_db_key(category: &str) -> String {
    db_title(&category_key(category))
}

/// A database holding the wiki's `page`, `categorylinks`, `pagelinks` and
/// `linktarget` tables.
pub trait Replica: CategoryClient + LinkStore {
    /// Start a read-only transaction so every query sees one snapshot.
    fn begin_snapshot(&mut self) -> Result<()>;
    fn end_snapshot(&mut self) -> Result<()>;
}

/// Replica-backed pipeline. Link rows come from the link tables, so
/// namespace filtering happens in SQL rather than on link text.
pub fn find_replica_red_links<R: Replica + ?Sized>(
    replica: &mut R,
    category: &str,
    max_depth: Option<usize>,
) -> Result<RedLinkReport> {
    replica
        .begin_snapshot()
        .context("failed to start replica snapshot")?;
    let result = collect_red_links(replica, category, max_depth);
    let ended = replica.end_snapshot();

    match (result, ended) {
        (Ok(report), Ok(())) => Ok(report),
        (Ok(_), Err(error)) => Err(error).context("failed to end replica snapshot"),
        (Err(error), Ok(())) => Err(error),
        (Err(error), Err(end_error)) => {
            warn!(error = %end_error, "failed to end replica snapshot");
            Err(error)
        }
    }
}

fn collect_red_links<R: Replica + ?Sized>(
    replica: &mut R,
    category: &str,
    max_depth: Option<usize>,
) -> Result<RedLinkReport> {
    let closure = replica.closure(category, max_depth)?;
    let ids: Vec<PageId> = closure.page_ids();

    let mut counter = LinkCounter::default();
    for (batch, chunk) in ids.chunks(PAGE_BATCH_SIZE).enumerate() {
        let ranked = replica
            .ranked_red_links(chunk)
            .with_context(|| format!("failed to query red links for batch {batch}"))?;
        debug!(batch, pages = chunk.len(), targets = ranked.len(), "batch done");
        // Batches cover disjoint pages, so per-batch distinct counts add up.
        for link in ranked {
            counter.add(&link.title, link.count);
        }
    }
    let red_links = counter.into_ranked();

    info!(
        category = %closure.root,
        pages = ids.len(),
        red_links = red_links.len(),
        "replica scan complete"
    );
    Ok(RedLinkReport {
        category: closure.root,
        member_pages: ids.len(),
        pages_with_red_links: None,
        skipped_pages: 0,
        red_links,
    })
}
