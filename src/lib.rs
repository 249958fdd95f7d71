//! mongotab - MongoDB schema discovery and CSV export
//!
//! Extracts flat, human-readable tabular data from schemaless MongoDB
//! collections in two phases:
//!
//! 1. **Discover**: sample a collection, infer its effective schema and
//!    cross-collection relationships, and write an editable field
//!    configuration file.
//! 2. **Export**: load the (possibly hand-edited) configuration and
//!    write CSV rows, resolving identifier references to display values
//!    through a caching layer with batched reference loads.
//!
//! # Usage
//!
//! ```bash
//! mongotab --database prod discover listings
//! # edit config/listings_fields.json
//! mongotab --database prod export listings -o listings.csv
//! ```

pub mod cache;
pub mod cli;
pub mod config;
pub mod connection;
pub mod discovery;
pub mod error;
pub mod export;
pub mod formatter;
pub mod traversal;

pub use cache::{CollectionCacheManager, ReferenceLookup};
pub use config::{DiscoveryConfiguration, FieldConfiguration};
pub use connection::MongoConnection;
pub use discovery::DiscoveryEngine;
pub use error::{MongotabError, Result};
pub use export::{ConfigExporter, ExportReport};
