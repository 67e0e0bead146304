//! # contractor-etl
//!
//! Data plumbing behind the federal-contractor analytics dashboard:
//! loading warehouse staging exports into SQLite, caching query results,
//! and reconciling UEIs with canonical contractor profiles.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌─────────────┐   ┌────────────┐   ┌──────────┐
//! │ staging/*.gz │──▶│  staging +  │──▶│   loader   │──▶│  SQLite  │
//! │  (CSV, \N)   │   │  transform  │   │ (batches)  │   │          │
//! └──────────────┘   └─────────────┘   └────────────┘   └────┬─────┘
//!                                                            │
//!                     ┌──────────────┐   ┌──────────────┐    │
//!                     │ query cache  │◀──│ matcher +    │◀───┘
//!                     │ (TTL, FIFO)  │   │ stats        │
//!                     └──────────────┘   └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! cetl init                 # create schema
//! cetl load all             # load every configured staging file
//! cetl match                # reconcile unmapped UEIs
//! cetl review list          # inspect low-confidence candidates
//! cetl stats                # mapping coverage
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`staging`] | Streaming gzip CSV reader |
//! | [`transform`] | NULL sentinel handling and type coercion |
//! | [`loader`] | Batched inserts with partial-failure reporting |
//! | [`cache`] | TTL query result cache |
//! | [`matcher`] | Fuzzy UEI-to-profile reconciliation |
//! | [`stats`] | Mapping coverage |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod cache;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod ingest;
pub mod loader;
pub mod match_cmd;
pub mod matcher;
pub mod migrate;
pub mod models;
pub mod progress;
pub mod staging;
pub mod stats;
pub mod tables;
pub mod transform;
