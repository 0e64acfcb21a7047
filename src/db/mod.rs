//! Store access for the survey table
//!
//! The table lives in an SQLite database opened through the blocking
//! rusqlite driver. Every connection opened here gets the regex SQL
//! functions the rewrite rules depend on.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │        Caller (CLI / tests)                         │
//! │  - opens one Connection per run                     │
//! └─────────────────────┬───────────────────────────────┘
//!                       │ &Connection
//!                       ▼
//! ┌─────────────────────────────────────────────────────┐
//! │        pipeline stages (rules / verify / stats)     │
//! │  - validated identifiers only                       │
//! │  - one transaction per mutating stage               │
//! └─────────────────────┬───────────────────────────────┘
//!                       │
//!                       ▼
//! ┌─────────────────────────────────────────────────────┐
//! │        SQLite file (+ REGEXP, regexp_replace)       │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod export;
pub mod schema;

pub use export::export_table_csv;
pub use schema::{
    count_rows, list_tables, open_database, open_in_memory, quote_identifier, register_functions,
    table_columns, validate_identifier, validate_table,
};
