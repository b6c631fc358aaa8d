//! Vodvault-DB: database schema, migrations, and query operations.
//!
//! This crate provides database functionality for vodvault using SQLite
//! with rusqlite and r2d2 connection pooling.
//!
//! # Modules
//!
//! - `migrations` - Database schema migrations
//! - `pool` - Connection pool management
//! - `models` - Rust models matching database schema
//! - `queries` - Database query operations

pub mod migrations;
pub mod models;
pub mod pool;
pub mod queries;
