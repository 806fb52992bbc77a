//! Support code for the famwatch command line tool

pub mod output;
pub mod settings;
