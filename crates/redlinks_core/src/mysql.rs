use anyhow::{Context, Result};
use mysql_async::prelude::Queryable;
use mysql_async::{Conn, OptsBuilder, Params, Value, from_row};
use tokio::runtime::{Builder, Runtime};
use tracing::{debug, info, warn};

use crate::category::{CategoryClient, CategoryMembers, PageId};
use crate::config::DatabaseSettings;
use crate::credentials::load_credentials;
use crate::links::LinkStore;
use crate::replica::{
    CATEGORY_MEMBERS_SQL, Replica, category_db_key, members_from_rows, rank_grouped_rows,
    ranked_red_links_sql, red_link_rows_sql,
};
use crate::resolver::RedLink;
use crate::title::display_title;

/// Wiki replica served by MySQL/MariaDB. Queries run on a private
/// single-threaded runtime so callers stay synchronous.
pub struct MysqlReplica {
    runtime: Runtime,
    conn: Option<Conn>,
}

impl MysqlReplica {
    pub fn connect(settings: &DatabaseSettings) -> Result<Self> {
        let credentials = load_credentials(&settings.credentials)?;
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .context("failed to start database runtime")?;

        let opts = OptsBuilder::default()
            .ip_or_hostname(settings.host.clone())
            .tcp_port(settings.port)
            .user(Some(credentials.user))
            .pass(Some(credentials.password))
            .db_name(Some(settings.name.clone()));
        let conn = runtime
            .block_on(Conn::new(opts))
            .with_context(|| {
                format!(
                    "failed to connect to {}@{}:{}",
                    settings.name, settings.host, settings.port
                )
            })?;
        info!(host = %settings.host, port = settings.port, db = %settings.name, "connected to replica");

        Ok(Self {
            runtime,
            conn: Some(conn),
        })
    }

    pub fn disconnect(mut self) -> Result<()> {
        match self.conn.take() {
            Some(conn) => self
                .runtime
                .block_on(conn.disconnect())
                .context("failed to close replica connection"),
            None => Ok(()),
        }
    }

    fn query<T>(
        &mut self,
        sql: &str,
        params: Vec<Value>,
        decode: fn(mysql_async::Row) -> T,
    ) -> Result<Vec<T>>
    where
        T: Send + 'static,
    {
        let conn = self.conn.as_mut().context("replica connection is closed")?;
        self.runtime.block_on(async {
            conn.exec_iter(sql, Params::Positional(params))
                .await
                .with_context(|| format!("failed query: {sql}"))?
                .map_and_drop(decode)
                .await
                .with_context(|| format!("failed to read rows for: {sql}"))
        })
    }

    fn execute(&mut self, statement: &str) -> Result<()> {
        let conn = self.conn.as_mut().context("replica connection is closed")?;
        self.runtime
            .block_on(conn.query_drop(statement))
            .with_context(|| format!("failed statement: {statement}"))
    }
}

impl Drop for MysqlReplica {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take()
            && let Err(error) = self.runtime.block_on(conn.disconnect())
        {
            warn!(%error, "failed to close replica connection");
        }
    }
}

fn page_params(pages: &[PageId]) -> Vec<Value> {
    pages.iter().map(|page| Value::from(page.0)).collect()
}

fn lossy(bytes: Vec<u8>) -> String {
    String::from_utf8_lossy(&bytes).into_owned()
}

impl CategoryClient for MysqlReplica {
    fn members(&mut self, category: &str) -> Result<CategoryMembers> {
        let rows = self.query(
            CATEGORY_MEMBERS_SQL,
            vec![Value::from(category_db_key(category))],
            from_row::<(i64, i32, Vec<u8>)>,
        )?;
        debug!(category, rows = rows.len(), "category rows");
        Ok(members_from_rows(
            category,
            rows.into_iter()
                .map(|(id, namespace, title)| (id, namespace, lossy(title))),
        ))
    }
}

impl LinkStore for MysqlReplica {
    fn links_for_pages(&mut self, pages: &[PageId]) -> Result<Vec<(PageId, String)>> {
        if pages.is_empty() {
            return Ok(Vec::new());
        }
        let rows = self.query(
            &red_link_rows_sql(pages.len()),
            page_params(pages),
            from_row::<(i64, Vec<u8>)>,
        )?;
        Ok(rows
            .into_iter()
            .map(|(page, title)| (PageId(page), display_title(&lossy(title))))
            .collect())
    }

    fn ranked_red_links(&mut self, pages: &[PageId]) -> Result<Vec<RedLink>> {
        if pages.is_empty() {
            return Ok(Vec::new());
        }
        let rows = self.query(
            &ranked_red_links_sql(pages.len()),
            page_params(pages),
            from_row::<(Vec<u8>, usize)>,
        )?;
        Ok(rank_grouped_rows(
            rows.into_iter().map(|(title, links)| (lossy(title), links)),
        ))
    }
}

impl Replica for MysqlReplica {
    fn begin_snapshot(&mut self) -> Result<()> {
        self.execute("START TRANSACTION READ ONLY")
    }

    fn end_snapshot(&mut self) -> Result<()> {
        self.execute("COMMIT")
    }
}
