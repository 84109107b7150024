use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bson::{Bson, Document, doc};
use log::{debug, info};

use crate::{
    Error,
    bulk::{WriteKind, WriteModel},
    classify::codes,
    client::{BoundBulk, BulkOutcome, Client, ServerCursor},
    config::DriverConfig,
    error::{ErrorDomain, LowLevelError},
    namespace::Namespace,
    options::{ReadPreference, ServerId, WriteConcern},
    query::QuerySpec,
    transport::{NetStream, StreamPrimitive, SystemConnector, TransportHandle},
};

use super::{connection::Connection, cursor::WireCursor};

/// The only server a single-connection client talks to.
pub const SERVER_ID: ServerId = ServerId(1);

/// Locks the shared connection. A panic while it was held cannot leave a request half
/// written in the buffer, so a poisoned lock is still usable.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Single-server [`Client`] speaking `OP_MSG` over one connection.
pub struct WireClient<S: StreamPrimitive + 'static = NetStream> {
    connection: Arc<Mutex<Connection<S>>>,
    write_concern: WriteConcern,
    read_preference: ReadPreference,
    stamp: u32,
}

impl WireClient<NetStream> {
    /// Connects to the first host of the connection string.
    pub fn connect(config: &DriverConfig) -> Result<Self, Error> {
        let endpoint = config
            .uri
            .hosts
            .first()
            .ok_or_else(|| Error::invalid_argument("Failed to parse MongoDB URI: no hosts"))?;

        let handle = TransportHandle::connect(&SystemConnector, endpoint, config)?;
        info!("connected to '{}'", endpoint.dsn());

        let connection = Connection::new(handle, config.socket_timeout(), config.debug.enabled());
        Ok(Self::new(
            connection,
            config.uri.write_concern.clone(),
            config.uri.read_preference.clone(),
        ))
    }
}

impl<S: StreamPrimitive + 'static> WireClient<S> {
    pub fn new(
        connection: Connection<S>,
        write_concern: WriteConcern,
        read_preference: ReadPreference,
    ) -> Self {
        Self {
            connection: Arc::new(Mutex::new(connection)),
            write_concern,
            read_preference,
            stamp: 1,
        }
    }

    /// Resolves a server hint; id 0 means no preference.
    fn select(&self, hint: Option<ServerId>) -> Result<ServerId, LowLevelError> {
        match hint {
            None | Some(ServerId(0)) => Ok(SERVER_ID),
            Some(id) if id == SERVER_ID => Ok(id),
            Some(id) => Err(LowLevelError::new(
                ErrorDomain::Client,
                codes::CLIENT_NO_ACCEPTABLE_PEER,
                format!("Requested server id {id} does not exist"),
            )),
        }
    }

    fn read_preference<'a>(&'a self, rp: Option<&'a ReadPreference>) -> &'a ReadPreference {
        rp.unwrap_or(&self.read_preference)
    }

    fn write_group(
        &self,
        bulk: &BoundBulk<'_>,
        kind: WriteKind,
        group: &[WriteModel],
    ) -> Result<Document, LowLevelError> {
        let entries: Vec<Bson> = group
            .iter()
            .map(|op| Bson::Document(op.to_document()))
            .collect();
        let collection = bulk.namespace.collection.as_str();

        let mut command = match kind {
            WriteKind::Insert => doc! { "insert": collection, "documents": entries },
            WriteKind::Update => doc! { "update": collection, "updates": entries },
            WriteKind::Delete => doc! { "delete": collection, "deletes": entries },
        };
        command.insert("ordered", bulk.bulk.is_ordered());
        if let Some(wc) = bulk.write_concern.to_document() {
            command.insert("writeConcern", wc);
        }

        lock(&self.connection).command(&bulk.namespace.db, &command)
    }
}

fn fetch_i64(doc: &Document, key: &str) -> Option<i64> {
    match doc.get(key)? {
        Bson::Int32(v) => Some(i64::from(*v)),
        Bson::Int64(v) => Some(*v),
        Bson::Double(v) => Some(*v as i64),
        _ => None,
    }
}

/// Copies `entries` with their `index` rebased from group to batch position.
fn rebase(entries: &[Bson], offset: usize) -> Vec<Document> {
    entries
        .iter()
        .filter_map(Bson::as_document)
        .map(|entry| {
            let mut entry = entry.clone();
            let index = fetch_i64(&entry, "index").unwrap_or_default() + offset as i64;
            entry.insert("index", index as i32);
            entry
        })
        .collect()
}

/// Folds one group's reply into the batch outcome.
fn merge_reply(outcome: &mut BulkOutcome, kind: WriteKind, reply: &Document, offset: usize) {
    let n = fetch_i64(reply, "n").unwrap_or_default();

    match kind {
        WriteKind::Insert => outcome.n_inserted += n,
        WriteKind::Delete => outcome.n_removed += n,
        WriteKind::Update => {
            let upserted = reply
                .get_array("upserted")
                .map(|u| rebase(u, offset))
                .unwrap_or_default();
            let n_upserted = upserted.len() as i64;

            outcome.n_upserted += n_upserted;
            outcome.n_matched += n - n_upserted;
            outcome.n_modified = match (outcome.n_modified, fetch_i64(reply, "nModified")) {
                (Some(total), Some(modified)) => Some(total + modified),
                _ => None,
            };
            outcome.upserted.extend(upserted);
        }
    }

    if let Ok(errors) = reply.get_array("writeErrors") {
        outcome.write_errors.extend(rebase(errors, offset));
    }
    // the first group's concern error is the one reported
    if let Ok(wce) = reply.get_document("writeConcernError") {
        if outcome.write_concern_error.is_empty() {
            outcome.write_concern_error = wce.clone();
        }
    }
}

impl<S: StreamPrimitive + 'static> Client for WireClient<S> {
    fn write_concern(&self) -> &WriteConcern {
        &self.write_concern
    }

    fn execute_bulk(&self, bulk: &BoundBulk<'_>) -> BulkOutcome {
        let mut outcome = BulkOutcome {
            n_modified: Some(0),
            ..Default::default()
        };

        match self.select(bulk.server_hint) {
            Ok(id) => outcome.server_id = Some(id),
            Err(e) => {
                outcome.error = Some(e);
                return outcome;
            }
        }

        let mut offset = 0;
        for group in bulk.bulk.operations().chunk_by(|a, b| a.kind() == b.kind()) {
            let kind = group[0].kind();

            match self.write_group(bulk, kind, group) {
                Ok(reply) => merge_reply(&mut outcome, kind, &reply, offset),
                Err(e) => {
                    debug!("{kind:?} on '{}' failed: {e}", bulk.namespace);
                    outcome.error = Some(e);
                    return outcome;
                }
            }
            offset += group.len();

            if bulk.bulk.is_ordered() && !outcome.write_errors.is_empty() {
                break;
            }
        }

        outcome.success =
            outcome.write_errors.is_empty() && outcome.write_concern_error.is_empty();
        outcome
    }

    fn find(
        &self,
        namespace: &Namespace,
        query: &QuerySpec,
        read_preference: Option<&ReadPreference>,
        server_hint: Option<ServerId>,
    ) -> Result<Box<dyn ServerCursor>, LowLevelError> {
        let server_id = self.select(server_hint)?;
        let read_preference = self.read_preference(read_preference).clone();

        Ok(Box::new(WireCursor::find(
            Arc::clone(&self.connection),
            server_id,
            self.stamp,
            namespace.clone(),
            query.clone(),
            Some(read_preference),
        )))
    }

    fn command(
        &self,
        db: &str,
        command: &Document,
        read_preference: Option<&ReadPreference>,
        server_hint: Option<ServerId>,
    ) -> Result<Box<dyn ServerCursor>, LowLevelError> {
        let server_id = self.select(server_hint)?;

        let mut command = command.clone();
        let read_preference = self.read_preference(read_preference);
        if !read_preference.is_primary() {
            command.insert("$readPreference", read_preference.to_document());
        }

        Ok(Box::new(WireCursor::command(
            Arc::clone(&self.connection),
            server_id,
            self.stamp,
            db,
            command,
        )))
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        classify::codes,
        transport::tests::{ScriptedStream, scripted_handle},
    };

    use super::*;

    fn client() -> WireClient<ScriptedStream> {
        let connection = Connection::new(
            scripted_handle(ScriptedStream::new(vec![])),
            std::time::Duration::from_secs(1),
            false,
        );
        WireClient::new(connection, WriteConcern::default(), ReadPreference::default())
    }

    #[test]
    fn server_hints() {
        let client = client();

        assert_eq!(client.select(None).unwrap(), SERVER_ID);
        assert_eq!(client.select(Some(ServerId(0))).unwrap(), SERVER_ID);
        assert_eq!(client.select(Some(ServerId(1))).unwrap(), SERVER_ID);
        assert_eq!(
            client.select(Some(ServerId(3))).unwrap_err().code,
            codes::CLIENT_NO_ACCEPTABLE_PEER
        );
    }

    #[test]
    fn first_write_concern_error_is_kept() {
        let mut outcome = BulkOutcome::default();

        merge_reply(&mut outcome, WriteKind::Insert, &doc! { "ok": 1.0, "n": 1 }, 0);
        assert!(outcome.write_concern_error.is_empty());

        merge_reply(
            &mut outcome,
            WriteKind::Delete,
            &doc! { "ok": 1.0, "n": 1, "writeConcernError": { "code": 64, "errmsg": "timed out" } },
            1,
        );
        merge_reply(
            &mut outcome,
            WriteKind::Insert,
            &doc! { "ok": 1.0, "n": 1, "writeConcernError": { "code": 100, "errmsg": "no replication" } },
            2,
        );

        assert_eq!(
            outcome.write_concern_error,
            doc! { "code": 64, "errmsg": "timed out" }
        );
        assert_eq!(outcome.n_inserted, 2);
        assert_eq!(outcome.n_removed, 1);
    }

    #[test]
    fn rebases_group_indexes() {
        let mut outcome = BulkOutcome {
            n_modified: Some(0),
            ..Default::default()
        };
        let reply = doc! {
            "ok": 1.0,
            "n": 2,
            "nModified": 1,
            "upserted": [{ "index": 1, "_id": 7 }],
            "writeErrors": [{ "index": 0, "code": 11000, "errmsg": "dup" }],
        };

        merge_reply(&mut outcome, WriteKind::Update, &reply, 3);

        assert_eq!(outcome.n_matched, 1);
        assert_eq!(outcome.n_upserted, 1);
        assert_eq!(outcome.n_modified, Some(1));
        assert_eq!(outcome.upserted[0].get_i32("index").unwrap(), 4);
        assert_eq!(outcome.write_errors[0].get_i32("index").unwrap(), 3);
    }
}
