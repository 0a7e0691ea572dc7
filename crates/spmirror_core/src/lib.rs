//! Core of the wiki mirroring tool: a sequential depth-first crawler
//! over a browser-rendered wiki, producing a browsable local tree with
//! rewritten internal links, downloaded assets, duplicate stubs, a
//! crawl manifest, and an append-only navigation log.

pub mod config;
pub mod crawler;
pub mod fetch;
pub mod log;
pub mod manifest;
pub mod page;
pub mod session;
pub mod verify;
