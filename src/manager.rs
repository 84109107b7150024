//! Caller-facing entry point.
//!
//! A [`Manager`] owns one [`Client`] and runs every operation through an [`Executor`],
//! always keeping the result.
//!
//! # Example
//! ```rust,no_run
//! use docwire::{Manager, query::QuerySpec};
//! use bson::doc;
//!
//! let manager = Manager::new("mongodb://localhost:27017/?w=majority", None).unwrap();
//!
//! manager.execute_insert("app.users", doc! { "name": "ada" }, None).unwrap();
//!
//! let mut users = manager
//!     .execute_query("app.users", &QuerySpec::filter(doc! { "name": "ada" }), None)
//!     .unwrap();
//! for user in users.iter() {
//!     println!("{}", user.unwrap());
//! }
//! ```
use bson::Document;

use crate::{
    Error,
    bulk::{BulkWrite, DeleteOptions, UpdateOptions},
    client::Client,
    config::DriverConfig,
    execute::{Executor, ResultMode},
    options::{ReadPreference, WriteConcern},
    protocol::WireClient,
    query::QuerySpec,
    result::QueryResult,
    write_result::WriteResult,
};

pub struct Manager {
    client: Box<dyn Client>,
    config: Option<DriverConfig>,
    debug: bool,
}

impl Manager {
    /// Parses `uri` and `driver_options` and connects the built-in wire client.
    pub fn new(uri: &str, driver_options: Option<&Document>) -> Result<Self, Error> {
        let config = DriverConfig::new(uri, driver_options)?;
        let client = WireClient::connect(&config)?;

        Ok(Self {
            client: Box::new(client),
            debug: config.debug.enabled(),
            config: Some(config),
        })
    }

    /// Runs operations through a caller-supplied client.
    pub fn with_client(client: impl Client + 'static) -> Self {
        Self {
            client: Box::new(client),
            config: None,
            debug: false,
        }
    }

    /// `None` when the manager was built around a foreign client.
    pub fn config(&self) -> Option<&DriverConfig> {
        self.config.as_ref()
    }

    pub fn executor(&self) -> Executor<'_> {
        Executor::new(self.client.as_ref()).with_debug(self.debug)
    }

    pub fn execute_command(&self, db: &str, command: &Document) -> Result<QueryResult, Error> {
        self.executor()
            .execute_command(db, command, None, None, ResultMode::Keep)?
            .ok_or_else(|| Error::runtime("command produced no result"))
    }

    pub fn execute_query(
        &self,
        namespace: &str,
        query: &QuerySpec,
        read_preference: Option<&ReadPreference>,
    ) -> Result<QueryResult, Error> {
        self.executor()
            .execute_query(namespace, query, read_preference, None, ResultMode::Keep)?
            .ok_or_else(|| Error::runtime("query produced no result"))
    }

    pub fn execute_bulk_write(
        &self,
        namespace: &str,
        bulk: &BulkWrite,
        write_concern: Option<&WriteConcern>,
    ) -> Result<WriteResult, Error> {
        self.executor()
            .execute_write(namespace, bulk, write_concern, None, ResultMode::Keep)?
            .ok_or_else(|| Error::runtime("write produced no result"))
    }

    pub fn execute_insert(
        &self,
        namespace: &str,
        document: Document,
        write_concern: Option<&WriteConcern>,
    ) -> Result<WriteResult, Error> {
        self.executor()
            .execute_insert(namespace, document, write_concern, ResultMode::Keep)?
            .ok_or_else(|| Error::runtime("insert produced no result"))
    }

    pub fn execute_update(
        &self,
        namespace: &str,
        filter: Document,
        update: Document,
        options: UpdateOptions,
        write_concern: Option<&WriteConcern>,
    ) -> Result<WriteResult, Error> {
        self.executor()
            .execute_update(namespace, filter, update, options, write_concern, ResultMode::Keep)?
            .ok_or_else(|| Error::runtime("update produced no result"))
    }

    pub fn execute_delete(
        &self,
        namespace: &str,
        filter: Document,
        options: DeleteOptions,
        write_concern: Option<&WriteConcern>,
    ) -> Result<WriteResult, Error> {
        self.executor()
            .execute_delete(namespace, filter, options, write_concern, ResultMode::Keep)?
            .ok_or_else(|| Error::runtime("delete produced no result"))
    }
}

#[cfg(test)]
mod tests {
    use bson::doc;

    use crate::{
        ErrorKind,
        client::{
            BulkOutcome,
            mock::{DropCounter, MockClient},
        },
    };

    use super::*;

    #[test]
    fn keeps_every_result() {
        let client = MockClient::with_outcome(BulkOutcome {
            success: true,
            n_removed: 4,
            ..Default::default()
        });
        let manager = Manager::with_client(client);

        let result = manager
            .execute_delete("app.items", doc! {}, DeleteOptions::default(), None)
            .unwrap();
        assert_eq!(result.deleted_count(), 4);
        assert!(manager.config().is_none());
    }

    #[test]
    fn command_results_are_iterable() {
        let manager = Manager::with_client(MockClient::with_documents(vec![doc! { "ok": 1.0 }]));

        let mut result = manager.execute_command("admin", &doc! { "ping": 1 }).unwrap();
        let docs = result.iter().collect::<Result<Vec<_>, _>>().unwrap();
        assert_eq!(docs, vec![doc! { "ok": 1.0 }]);
    }

    #[test]
    fn query_results_release_their_cursor() {
        let client = MockClient::with_documents(vec![doc! { "n": 1 }]);
        let drops: DropCounter = client.drops.clone();
        let manager = Manager::with_client(client);

        let result = manager
            .execute_query("app.items", &QuerySpec::default(), None)
            .unwrap();
        assert_eq!(drops.count(), 0);
        drop(result);
        assert_eq!(drops.count(), 1);
    }

    #[test]
    fn invalid_update_is_rejected_before_dispatch() {
        let manager = Manager::with_client(MockClient::default());
        let err = manager
            .execute_update(
                "app.items",
                doc! {},
                doc! { "replacement": true },
                UpdateOptions {
                    multi: true,
                    upsert: false,
                },
                None,
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn connection_string_errors_surface_before_connecting() {
        let err = Manager::new("postgres://localhost", None).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }
}
