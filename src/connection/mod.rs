//! Connection management
//!
//! Establishes the MongoDB client, resolves the target database from
//! flags, URI, or config file, and verifies reachability with a ping
//! before any discovery or export work starts. Connectivity failures
//! here are fatal by design; nothing downstream retries them.

use bson::doc;
use mongodb::{options::ClientOptions, Client, Database};
use tracing::{debug, info};

use crate::config::ConnectionSettings;
use crate::error::{ConnectionError, Result};

/// An established, ping-verified connection.
#[derive(Debug)]
pub struct MongoConnection {
    client: Client,
    database: Database,
}

impl MongoConnection {
    /// Connect and ping.
    ///
    /// The database name is taken from the settings if present, else
    /// from the URI's default database. Missing both is an error; the
    /// engines need a concrete database to enumerate collections in.
    pub async fn connect(settings: &ConnectionSettings) -> Result<Self> {
        let options = ClientOptions::parse(&settings.uri)
            .await
            .map_err(|e| ConnectionError::InvalidUri(e.to_string()))?;

        let database_name = settings
            .database
            .clone()
            .or_else(|| options.default_database.clone())
            .ok_or(ConnectionError::DatabaseNotSpecified)?;

        let client = Client::with_options(options)
            .map_err(|e| ConnectionError::ConnectionFailed(e.to_string()))?;
        let database = client.database(&database_name);

        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| ConnectionError::PingFailed(e.to_string()))?;
        info!(database = %database_name, "connected");

        Ok(Self { client, database })
    }

    /// Handle to the selected database. Cloning is cheap.
    pub fn database(&self) -> Database {
        self.database.clone()
    }

    /// Names of all collections in the database, system namespaces
    /// excluded.
    pub async fn collection_names(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self
            .database
            .list_collection_names()
            .await?
            .into_iter()
            .filter(|name| !name.starts_with("system."))
            .collect();
        names.sort();
        debug!(count = names.len(), "listed collections");
        Ok(names)
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MongotabError;

    #[tokio::test]
    async fn test_connect_requires_database_name() {
        let settings = ConnectionSettings {
            uri: "mongodb://localhost:27017".to_string(),
            database: None,
        };
        let err = MongoConnection::connect(&settings).await.unwrap_err();
        assert!(matches!(
            err,
            MongotabError::Connection(ConnectionError::DatabaseNotSpecified)
        ));
    }

    #[tokio::test]
    async fn test_connect_rejects_invalid_uri() {
        let settings = ConnectionSettings {
            uri: "not-a-uri".to_string(),
            database: Some("test".to_string()),
        };
        let err = MongoConnection::connect(&settings).await.unwrap_err();
        assert!(matches!(
            err,
            MongotabError::Connection(ConnectionError::InvalidUri(_))
        ));
    }
}
