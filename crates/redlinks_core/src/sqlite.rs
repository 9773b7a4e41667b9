use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use rusqlite::{Connection, OpenFlags, params_from_iter};

use crate::category::{CategoryClient, CategoryMembers, PageId};
use crate::links::LinkStore;
use crate::replica::{
    CATEGORY_MEMBERS_SQL, Replica, category_db_key, members_from_rows, rank_grouped_rows,
    ranked_red_links_sql, red_link_rows_sql,
};
use crate::resolver::RedLink;
use crate::title::display_title;

const REQUIRED_TABLES: [&str; 4] = ["page", "categorylinks", "pagelinks", "linktarget"];

/// Replica tables mirrored into a local SQLite file.
pub struct SqliteReplica {
    connection: Connection,
    in_snapshot: bool,
}

impl SqliteReplica {
    pub fn open(db_path: &Path) -> Result<Self> {
        if !db_path.exists() {
            bail!("replica database not found: {}", db_path.display());
        }
        let connection = Connection::open_with_flags(db_path, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .with_context(|| format!("failed to open {}", db_path.display()))?;
        connection
            .busy_timeout(Duration::from_secs(5))
            .context("failed to set sqlite busy timeout")?;
        Self::from_connection(connection)
    }

    pub fn from_connection(connection: Connection) -> Result<Self> {
        for table in REQUIRED_TABLES {
            if !table_exists(&connection, table)? {
                bail!("replica database is missing table `{table}`");
            }
        }
        Ok(Self {
            connection,
            in_snapshot: false,
        })
    }
}

impl CategoryClient for SqliteReplica {
    fn members(&mut self, category: &str) -> Result<CategoryMembers> {
        let mut statement = self
            .connection
            .prepare_cached(CATEGORY_MEMBERS_SQL)
            .context("failed to prepare category members query")?;
        let rows = statement
            .query_map([category_db_key(category)], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i32>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .context("failed to run category members query")?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row.context("failed to decode category member row")?);
        }
        Ok(members_from_rows(category, out))
    }
}

impl LinkStore for SqliteReplica {
    fn links_for_pages(&mut self, pages: &[PageId]) -> Result<Vec<(PageId, String)>> {
        if pages.is_empty() {
            return Ok(Vec::new());
        }
        let sql = red_link_rows_sql(pages.len());
        let mut statement = self
            .connection
            .prepare(&sql)
            .context("failed to prepare red link query")?;
        let rows = statement
            .query_map(params_from_iter(pages.iter().map(|page| page.0)), |row| {
                Ok((PageId(row.get(0)?), row.get::<_, String>(1)?))
            })
            .context("failed to run red link query")?;

        let mut out = Vec::new();
        for row in rows {
            let (page, title) = row.context("failed to decode red link row")?;
            out.push((page, display_title(&title)));
        }
        Ok(out)
    }

    fn ranked_red_links(&mut self, pages: &[PageId]) -> Result<Vec<RedLink>> {
        if pages.is_empty() {
            return Ok(Vec::new());
        }
        let sql = ranked_red_links_sql(pages.len());
        let mut statement = self
            .connection
            .prepare(&sql)
            .context("failed to prepare ranked red link query")?;
        let rows = statement
            .query_map(params_from_iter(pages.iter().map(|page| page.0)), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })
            .context("failed to run ranked red link query")?;

        let mut out = Vec::new();
        for row in rows {
            let (title, links) = row.context("failed to decode ranked red link row")?;
            let links = usize::try_from(links).context("link count does not fit into usize")?;
            out.push((title, links));
        }
        Ok(rank_grouped_rows(out))
    }
}

impl Replica for SqliteReplica {
    fn begin_snapshot(&mut self) -> Result<()> {
        self.connection
            .execute_batch("BEGIN")
            .context("failed to begin sqlite transaction")?;
        self.in_snapshot = true;
        Ok(())
    }

    fn end_snapshot(&mut self) -> Result<()> {
        if !self.in_snapshot {
            return Ok(());
        }
        self.in_snapshot = false;
        self.connection
            .execute_batch("COMMIT")
            .context("failed to commit sqlite transaction")
    }
}

fn table_exists(connection: &Connection, table_name: &str) -> Result<bool> {
    let exists: i64 = connection
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
            [table_name],
            |row| row.get(0),
        )
        .with_context(|| format!("failed to check sqlite_master for table {table_name}"))?;
    Ok(exists == 1)
}
