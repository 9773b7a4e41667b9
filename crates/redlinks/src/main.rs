use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use redlinks_core::config::{DatabaseOverrides, RedlinksConfig, load_config, resolve_config_path};
use redlinks_core::dump::XmlDump;
use redlinks_core::mediawiki::{MediaWikiClient, MediaWikiClientConfig};
use redlinks_core::mysql::MysqlReplica;
use redlinks_core::replica::find_replica_red_links;
use redlinks_core::report::{render_json, render_text};
use redlinks_core::resolver::{
    FragmentPolicy, RedLinkReport, ResolveOptions, find_dump_red_links,
};
use redlinks_core::sqlite::SqliteReplica;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "redlinks",
    version,
    about = "Rank missing articles linked from the pages of a wiki category"
)]
struct Cli {
    #[arg(short, long, global = true, help = "Enable debug logging")]
    verbose: bool,
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Print the report as JSON")]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Scan an XML dump for red links in a category")]
    Dump(DumpArgs),
    #[command(about = "Query a wiki database replica for red links in a category")]
    Sql(SqlArgs),
}

#[derive(Debug, Args)]
struct DumpArgs {
    category: String,
    #[arg(value_name = "DUMP", help = "pages-articles XML dump (defaults to [dump].path)")]
    dump: Option<PathBuf>,
    #[arg(long, value_name = "URL", help = "Action API used for category membership")]
    api_url: Option<String>,
    #[arg(long, value_name = "N", help = "Stop descending after N subcategory levels")]
    depth: Option<usize>,
    #[arg(long, help = "Count Page#Section links as links to Page")]
    fold_fragments: bool,
}

#[derive(Debug, Args)]
struct SqlArgs {
    category: String,
    #[arg(long, value_name = "HOST")]
    dbhost: Option<String>,
    #[arg(long, value_name = "PORT")]
    dbport: Option<u16>,
    #[arg(long, value_name = "NAME")]
    dbname: Option<String>,
    #[arg(long, value_name = "PATH", help = "MySQL option file with a [client] section")]
    credentials: Option<PathBuf>,
    #[arg(long, value_name = "PATH", help = "Read a local SQLite mirror instead of MySQL")]
    sqlite: Option<PathBuf>,
    #[arg(long, value_name = "N", help = "Stop descending after N subcategory levels")]
    depth: Option<usize>,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = load_runtime_config(&cli)?;
    let report = match cli.command {
        Commands::Dump(args) => run_dump(&config, args)?,
        Commands::Sql(args) => run_sql(&config, args)?,
    };

    info!(
        category = %report.category,
        member_pages = report.member_pages,
        red_links = report.red_links.len(),
        skipped_pages = report.skipped_pages,
        "done"
    );
    if cli.json {
        println!("{}", render_json(&report)?);
    } else {
        print!("{}", render_text(&report.red_links));
    }
    Ok(())
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn load_runtime_config(cli: &Cli) -> Result<RedlinksConfig> {
    let cwd = env::current_dir().context("failed to resolve current directory")?;
    let config_path = resolve_config_path(cli.config.as_deref(), &cwd);
    if cli.config.is_some() && !config_path.exists() {
        bail!("config file not found: {}", config_path.display());
    }
    load_config(&config_path)
}

fn run_dump(config: &RedlinksConfig, args: DumpArgs) -> Result<RedLinkReport> {
    let Some(dump_path) = config.dump_path(args.dump.as_deref()) else {
        bail!("no dump file given; pass DUMP or set [dump].path in the config");
    };
    let dump = XmlDump::open(&dump_path)?;
    let client_config = MediaWikiClientConfig::from_config(config).with_api_url(args.api_url);
    info!(
        dump = %dump_path.display(),
        api_url = %client_config.api_url,
        "scanning dump"
    );
    let mut client = MediaWikiClient::new(client_config)?;

    let options = ResolveOptions {
        fragments: if args.fold_fragments {
            FragmentPolicy::FoldIntoPage
        } else {
            FragmentPolicy::Exclude
        },
        max_depth: args.depth,
    };
    let report = find_dump_red_links(&dump, &mut client, &args.category, &options)?;
    info!(api_requests = client.request_count(), "category lookup finished");
    Ok(report)
}

fn run_sql(config: &RedlinksConfig, args: SqlArgs) -> Result<RedLinkReport> {
    if let Some(db_path) = &args.sqlite {
        info!(db = %db_path.display(), "reading sqlite replica");
        let mut replica = SqliteReplica::open(db_path)?;
        return find_replica_red_links(&mut replica, &args.category, args.depth);
    }

    let settings = config.database_settings(&DatabaseOverrides {
        host: args.dbhost,
        port: args.dbport,
        name: args.dbname,
        credentials: args.credentials,
    })?;
    let mut replica = MysqlReplica::connect(&settings)?;
    let report = find_replica_red_links(&mut replica, &args.category, args.depth)?;
    replica.disconnect()?;
    Ok(report)
}
