pub mod accession;
pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod fs_util;
pub mod info;
pub mod input;
pub mod output;
pub mod remote;
pub mod state;
pub mod store;
pub mod table;
pub mod taxonomy;
pub mod tool;
