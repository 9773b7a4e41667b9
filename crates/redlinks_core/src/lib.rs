pub mod category;
pub mod config;
pub mod credentials;
pub mod dump;
pub mod links;
pub mod mediawiki;
pub mod mysql;
pub mod replica;
pub mod report;
pub mod resolver;
pub mod sqlite;
pub mod title;
pub mod wikitext;
