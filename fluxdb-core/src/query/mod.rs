//! Line-protocol command dispatch
//!
//! One [`QueryProcessor`] exists per client connection. It parses each
//! request line, routes it to the database manager, the active collection
//! or the pub/sub module, and renders the `OK`/`ERROR` response. Multi-row
//! responses emit an `OK COUNT=<n>` header followed by `ID <id> <json>`
//! lines.

mod predicate;

pub use predicate::matches;

use crate::index::IndexKind;
use crate::manager::DatabaseManager;
use crate::pubsub::{PubSubManager, Subscriber};
use crate::types::{document_to_json, parse_document};
use crate::{Collection, FluxError, Id, Value};
use std::sync::Arc;
use std::time::Duration;

/// Per-connection command processor
pub struct QueryProcessor {
    manager: Arc<DatabaseManager>,
    pubsub: Arc<PubSubManager>,
    subscriber: Arc<dyn Subscriber>,
    active_db: Option<Arc<Collection>>,
    requires_auth: bool,
    authenticated: bool,
    password: String,
}

impl QueryProcessor {
    /// Create a processor for one connection; an empty password disables
    /// authentication
    pub fn new(
        manager: Arc<DatabaseManager>,
        pubsub: Arc<PubSubManager>,
        subscriber: Arc<dyn Subscriber>,
        password: &str,
    ) -> Self {
        Self {
            manager,
            pubsub,
            subscriber,
            active_db: None,
            requires_auth: !password.is_empty(),
            authenticated: password.is_empty(),
            password: password.to_string(),
        }
    }

    /// Handle one request line and return the full response
    pub fn process(&mut self, request: &str) -> String {
        let request = request.trim_end();

        if let Some(args) = request.strip_prefix("AUTH ") {
            return self.handle_auth(args);
        }
        if self.requires_auth && !self.authenticated {
            return "ERROR NO_AUTH (Use 'AUTH <password>')\n".into();
        }

        if let Some(args) = request.strip_prefix("USE ") {
            self.handle_use(args)
        } else if request == "SHOW DBS" {
            self.handle_show_dbs()
        } else if let Some(args) = request.strip_prefix("DROP DATABASE ") {
            self.handle_drop_db(args)
        } else if let Some(args) = request.strip_prefix("INSERT ") {
            self.handle_insert(args)
        } else if request == "GET" {
            self.handle_get("")
        } else if let Some(args) = request.strip_prefix("GET ") {
            self.handle_get(args)
        } else if let Some(args) = request.strip_prefix("FIND ") {
            self.handle_find(args)
        } else if let Some(args) = request.strip_prefix("UPDATE ") {
            self.handle_update(args)
        } else if let Some(args) = request.strip_prefix("DELETE ") {
            self.handle_delete(args)
        } else if let Some(args) = request.strip_prefix("INDEX ") {
            self.handle_index(args)
        } else if let Some(args) = request.strip_prefix("EXPIRE ") {
            self.handle_expire(args)
        } else if request == "CHECKPOINT" {
            self.handle_checkpoint()
        } else if request == "FLUSHDB" {
            self.handle_flushdb()
        } else if request == "STATS" {
            self.handle_stats()
        } else if let Some(args) = request.strip_prefix("CONFIG ") {
            self.handle_config(args)
        } else if let Some(args) = request.strip_prefix("SUBSCRIBE ") {
            self.handle_subscribe(args)
        } else if let Some(args) = request.strip_prefix("PUBLISH ") {
            self.handle_publish(args)
        } else if request == "HELP" {
            handle_help()
        } else {
            "ERROR UNKNOWN_COMMAND\n".into()
        }
    }

    /// Drop all pub/sub registrations; called when the connection ends
    pub fn disconnect(&self) {
        self.pubsub.unsubscribe_all(self.subscriber.id());
    }

    fn active_db(&self) -> Result<&Arc<Collection>, FluxError> {
        self.active_db.as_ref().ok_or_else(|| {
            FluxError::Protocol("NO_DATABASE_SELECTED (Type 'USE <name>')".into())
        })
    }

    // --- session commands ---

    fn handle_auth(&mut self, args: &str) -> String {
        if !self.requires_auth {
            return "OK AUTHENTICATED\n".into();
        }
        if args.trim() == self.password {
            self.authenticated = true;
            "OK AUTHENTICATED\n".into()
        } else {
            "ERROR WRONG_PASSWORD\n".into()
        }
    }

    fn handle_use(&mut self, args: &str) -> String {
        let name = args.trim();
        if name.is_empty() || !is_valid_db_name(name) {
            return "ERROR INVALID_NAME\n".into();
        }

        match self.manager.open_or_create(name) {
            Ok((coll, created)) => {
                self.active_db = Some(coll);
                if created {
                    format!("OK SWITCHED_TO {name} (NEW_DATABASE_CREATED)\n")
                } else {
                    format!("OK SWITCHED_TO {name}\n")
                }
            }
            Err(e) => error_line(&e),
        }
    }

    fn handle_show_dbs(&self) -> String {
        let names = self.manager.list();
        let quoted: Vec<String> = names.iter().map(|n| format!("\"{n}\"")).collect();
        format!("OK [{}]\n", quoted.join(", "))
    }

    fn handle_drop_db(&mut self, args: &str) -> String {
        let name = args.trim();
        match self.manager.drop_database(name) {
            Ok(()) => {
                self.active_db = None;
                format!("OK DROPPED {name} (Please USE a database)\n")
            }
            Err(e) => error_line(&e),
        }
    }

    // --- CRUD commands ---

    fn handle_insert(&self, json: &str) -> String {
        let db = match self.active_db() {
            Ok(db) => db,
            Err(e) => return error_line(&e),
        };
        match parse_document(json).and_then(|doc| db.insert(doc)) {
            Ok(id) => format!("OK ID={id}\n"),
            Err(e) => error_line(&e),
        }
    }

    fn handle_get(&self, args: &str) -> String {
        let db = match self.active_db() {
            Ok(db) => db,
            Err(e) => return error_line(&e),
        };
        let args = args.trim();

        if args.is_empty() {
            let ids = db.find_all(|_| true);
            return render_rows(db, &ids);
        }

        if let Some((start, end)) = args.split_once('-') {
            let (Ok(start), Ok(end)) = (start.trim().parse::<Id>(), end.trim().parse::<Id>())
            else {
                return "ERROR INVALID_RANGE\n".into();
            };
            if start > end {
                return "ERROR INVALID_RANGE\n".into();
            }
            let ids: Vec<Id> = db
                .find_all(|_| true)
                .into_iter()
                .filter(|id| (start..=end).contains(id))
                .collect();
            return render_rows(db, &ids);
        }

        let Ok(id) = args.parse::<Id>() else {
            return "ERROR INVALID_ID\n".into();
        };
        match db.get(id) {
            Some(doc) => format!("OK {}\n", document_to_json(&doc)),
            None => "ERROR NOT_FOUND\n".into(),
        }
    }

    fn handle_find(&self, json: &str) -> String {
        let db = match self.active_db() {
            Ok(db) => db,
            Err(e) => return error_line(&e),
        };
        let query = match parse_document(json) {
            Ok(query) => query,
            Err(e) => return error_line(&e),
        };
        if query.is_empty() {
            return "ERROR EMPTY_QUERY\n".into();
        }

        let mut ids = None;
        if query.len() == 1 {
            if let Some((field, constraint)) = query.iter().next() {
                let is_range = matches!(constraint, Value::Object(_));

                if !is_range {
                    let probe = db.find(field, constraint);
                    if !probe.is_empty() {
                        ids = Some(probe);
                    }
                }
                if ids.is_none() {
                    db.report_query_miss(field, is_range);
                }
            }
        }

        let ids = ids.unwrap_or_else(|| db.find_all(|doc| matches(doc, &query)));
        render_rows(db, &ids)
    }

    fn handle_update(&self, args: &str) -> String {
        let db = match self.active_db() {
            Ok(db) => db,
            Err(e) => return error_line(&e),
        };
        let Some(json_start) = args.find('{') else {
            return "ERROR MISSING_JSON\n".into();
        };
        let Ok(id) = args[..json_start].trim().parse::<Id>() else {
            return "ERROR INVALID_FORMAT\n".into();
        };

        match parse_document(&args[json_start..]).and_then(|doc| db.update(id, doc)) {
            Ok(()) => "OK UPDATED\n".into(),
            Err(e) => error_line(&e),
        }
    }

    fn handle_delete(&self, args: &str) -> String {
        let db = match self.active_db() {
            Ok(db) => db,
            Err(e) => return error_line(&e),
        };
        let Ok(id) = args.trim().parse::<Id>() else {
            return "ERROR INVALID_ID\n".into();
        };
        match db.remove(id) {
            Ok(()) => "OK DELETED\n".into(),
            Err(e) => error_line(&e),
        }
    }

    // --- utility commands ---

    fn handle_index(&self, args: &str) -> String {
        let db = match self.active_db() {
            Ok(db) => db,
            Err(e) => return error_line(&e),
        };
        let mut tokens = args.split_whitespace();
        let Some(field) = tokens.next() else {
            return "ERROR INVALID_ARGS\n".into();
        };
        let kind = match tokens.next() {
            None | Some("0") => IndexKind::Hash,
            Some("1") => IndexKind::Sorted,
            Some(_) => return "ERROR INVALID_ARGS\n".into(),
        };
        db.create_index(field, kind);
        "OK INDEX_CREATED\n".into()
    }

    fn handle_expire(&self, args: &str) -> String {
        let db = match self.active_db() {
            Ok(db) => db,
            Err(e) => return error_line(&e),
        };
        let mut tokens = args.split_whitespace();
        let (Some(Ok(id)), Some(Ok(seconds))) = (
            tokens.next().map(str::parse::<Id>),
            tokens.next().map(str::parse::<u64>),
        ) else {
            return "ERROR INVALID_ARGS\n".into();
        };
        db.expire(id, Duration::from_secs(seconds));
        "OK TTL_SET\n".into()
    }

    fn handle_checkpoint(&self) -> String {
        let db = match self.active_db() {
            Ok(db) => db,
            Err(e) => return error_line(&e),
        };
        match db.checkpoint() {
            Ok(()) => "OK CHECKPOINT_COMPLETE\n".into(),
            Err(e) => error_line(&e),
        }
    }

    fn handle_flushdb(&self) -> String {
        let db = match self.active_db() {
            Ok(db) => db,
            Err(e) => return error_line(&e),
        };
        match db.clear() {
            Ok(()) => "OK FLUSHED\n".into(),
            Err(e) => error_line(&e),
        }
    }

    fn handle_stats(&self) -> String {
        let db = match self.active_db() {
            Ok(db) => db,
            Err(e) => return error_line(&e),
        };
        match serde_json::to_string(&db.stats()) {
            Ok(json) => format!("OK {json}\n"),
            Err(e) => format!("ERROR {e}\n"),
        }
    }

    fn handle_config(&self, args: &str) -> String {
        let db = match self.active_db() {
            Ok(db) => db,
            Err(e) => return error_line(&e),
        };
        let mut tokens = args.split_whitespace();
        let (Some(param), Some(value)) = (tokens.next(), tokens.next()) else {
            return "ERROR INVALID_ARGS\n".into();
        };
        let enabled = match value {
            "0" => false,
            "1" => true,
            _ => return "ERROR INVALID_VALUE (Use 0 or 1)\n".into(),
        };

        match param {
            "ADAPTIVE" => {
                db.set_adaptive(enabled);
                format!("OK CONFIG_UPDATED ADAPTIVE={}\n", on_off(enabled))
            }
            "PUBSUB" => {
                self.pubsub.set_enabled(enabled);
                format!("OK CONFIG_UPDATED PUBSUB={}\n", on_off(enabled))
            }
            _ => "ERROR UNKNOWN_CONFIG\n".into(),
        }
    }

    // --- pub/sub commands ---

    fn handle_subscribe(&self, args: &str) -> String {
        if !self.pubsub.is_enabled() {
            return "ERROR PUBSUB_DISABLED\n".into();
        }
        let channel = args.trim();
        if channel.is_empty() {
            return "ERROR INVALID_ARGS\n".into();
        }
        self.pubsub.subscribe(channel, self.subscriber.clone());
        format!("OK SUBSCRIBED_TO {channel}\n")
    }

    fn handle_publish(&self, args: &str) -> String {
        if !self.pubsub.is_enabled() {
            return "ERROR PUBSUB_DISABLED\n".into();
        }
        let Some((channel, message)) = args.split_once(' ') else {
            return "ERROR INVALID_ARGS\n".into();
        };
        let receivers = self.pubsub.publish(channel, message);
        format!("OK RECEIVERS={receivers}\n")
    }
}

fn render_rows(db: &Collection, ids: &[Id]) -> String {
    let mut response = format!("OK COUNT={}\n", ids.len());
    for &id in ids {
        if let Some(doc) = db.get(id) {
            response.push_str(&format!("ID {id} {}\n", document_to_json(&doc)));
        }
    }
    response
}

fn error_line(e: &FluxError) -> String {
    match e {
        FluxError::NotFound(_) => "ERROR NOT_FOUND\n".into(),
        FluxError::DatabaseNotFound(_) => "ERROR DB_NOT_FOUND\n".into(),
        FluxError::Protocol(detail) => format!("ERROR {detail}\n"),
        other => format!("ERROR {other}\n"),
    }
}

fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "ON"
    } else {
        "OFF"
    }
}

/// Database names become file stems, so keep them path-safe
fn is_valid_db_name(name: &str) -> bool {
    name.chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn handle_help() -> String {
    let mut msg = String::from("OK \n=== FluxDB Commands ===\n");
    msg.push_str("USE <db_name>             : Switch database\n");
    msg.push_str("SHOW DBS                  : List all databases\n");
    msg.push_str("DROP DATABASE <name>      : Delete database permanently\n");
    msg.push_str("AUTH <password>           : Authenticate\n");
    msg.push_str("INSERT <json>             : Insert document\n");
    msg.push_str("GET <id> | <start-end>    : Get doc by ID or range\n");
    msg.push_str("FIND <json_query>         : Search (e.g. {\"age\": {\"$gt\": 18}})\n");
    msg.push_str("UPDATE <id> <json>        : Update document\n");
    msg.push_str("DELETE <id>               : Delete by ID\n");
    msg.push_str("INDEX <field> [0|1]       : Create hash (0) or sorted (1) index\n");
    msg.push_str("EXPIRE <id> <seconds>     : Set TTL for document\n");
    msg.push_str("STATS                     : Show DB stats and fields\n");
    msg.push_str("CHECKPOINT                : Force save to disk\n");
    msg.push_str("FLUSHDB                   : Clear active database\n");
    msg.push_str("CONFIG <param> <value>    : Set ADAPTIVE (1/0) or PUBSUB (1/0)\n");
    msg.push_str("PUBLISH <ch> <msg>        : Send message\n");
    msg.push_str("SUBSCRIBE <ch>            : Listen to channel\n");
    msg
}
