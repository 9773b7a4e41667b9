use std::collections::{BTreeSet, HashSet, VecDeque};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info};

use crate::title::{bare_category_name, category_key};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct PageId(pub i64);

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct MemberPage {
    pub id: PageId,
    pub title: String,
}

impl MemberPage {
    pub fn new(id: i64, title: impl Into<String>) -> Self {
        Self {
            id: PageId(id),
            title: title.into(),
        }
    }
}

/// Direct members of one category: articles and subcategory names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoryMembers {
    pub pages: Vec<MemberPage>,
    pub subcategories: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CategoryClosure {
    pub root: String,
    pub pages: BTreeSet<MemberPage>,
    pub categories_visited: usize,
}

impl CategoryClosure {
    pub fn titles(&self) -> BTreeSet<String> {
        self.pages.iter().map(|page| page.title.clone()).collect()
    }

    pub fn page_ids(&self) -> Vec<PageId> {
        let ids: BTreeSet<PageId> = self.pages.iter().map(|page| page.id).collect();
        ids.into_iter().collect()
    }
}

pub trait CategoryClient {
    /// Articles and subcategories directly inside `category`. The name may
    /// carry a `Category:` prefix or not.
    fn members(&mut self, category: &str) -> Result<CategoryMembers>;

    /// All articles in `category` and its subcategories, transitively.
    /// `max_depth = Some(0)` keeps only direct members.
    fn closure(&mut self, category: &str, max_depth: Option<usize>) -> Result<CategoryClosure> {
        category_closure(self, category, max_depth)
    }
}

/// Breadth-first walk over subcategory edges. Each category is expanded at
/// most once, so cycles and diamonds terminate.
pub fn category_closure<C: CategoryClient + ?Sized>(
    client: &mut C,
    category: &str,
    max_depth: Option<usize>,
) -> Result<CategoryClosure> {
    let root = bare_category_name(category).to_string();
    let mut visited: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<(String, usize)> = VecDeque::new();
    let mut pages = BTreeSet::new();

    visited.insert(category_key(&root));
    queue.push_back((root.clone(), 0));

    while let Some((name, depth)) = queue.pop_front() {
        let members = client
            .members(&name)
            .with_context(|| format!("failed to list members of Category:{name}"))?;
        debug!(
            category = %name,
            depth,
            pages = members.pages.len(),
            subcategories = members.subcategories.len(),
            "expanded category"
        );
        pages.extend(members.pages);

        if max_depth.is_some_and(|limit| depth >= limit) {
            continue;
        }
        for subcategory in members.subcategories {
            let subcategory = bare_category_name(&subcategory).to_string();
            if visited.insert(category_key(&subcategory)) {
                queue.push_back((subcategory, depth + 1));
            } else {
                debug!(category = %subcategory, "already visited");
            }
        }
    }

    info!(
        category = %root,
        categories = visited.len(),
        pages = pages.len(),
        "category closure complete"
    );
    Ok(CategoryClosure {
        root,
        pages,
        categories_visited: visited.len(),
    })
}
