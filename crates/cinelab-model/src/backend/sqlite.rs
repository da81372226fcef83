//! SQLite backend.
//!
//! URLs have the form `sqlite:<path>[;<package-id>]`; the package id
//! defaults to the empty string, so one file can hold several packages.
//! `sqlite::memory:` names a store shared by every package bound to it,
//! which lives as long as one of them stays bound.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

use super::schema::{Schema, BACKEND_VERSION};
use super::{
    AnnotationQuery, Backend, BackendFactory, BackendResult, Binding, ContentRow, ElementData,
    ElementRow,
};
use crate::config::StorageConfig;
use crate::element::ElementKind;
use crate::error::BackendError;
use crate::meta::MetaValue;
use crate::sync::lock;

const URL_SCHEME: &str = "sqlite:";
const MEMORY_PATH: &str = ":memory:";

/// A parsed `sqlite:` package URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqliteUrl {
    /// `:memory:` or an absolute file path
    pub path: String,
    pub package_id: String,
}

impl SqliteUrl {
    pub fn parse(url: &str) -> BackendResult<Self> {
        let rest = url
            .strip_prefix(URL_SCHEME)
            .ok_or_else(|| BackendError::InvalidUrl(url.to_string()))?;
        let (path, package_id) = match rest.split_once(';') {
            Some((path, id)) => (path, id),
            None => (rest, ""),
        };
        if path.is_empty() {
            return Err(BackendError::InvalidUrl(url.to_string()));
        }
        let path = if path == MEMORY_PATH {
            path.to_string()
        } else {
            let p = Path::new(path);
            let absolute = if p.is_absolute() {
                p.to_path_buf()
            } else {
                std::env::current_dir()
                    .map_err(|_| BackendError::InvalidUrl(url.to_string()))?
                    .join(p)
            };
            absolute.to_string_lossy().into_owned()
        };
        Ok(Self {
            path,
            package_id: package_id.to_string(),
        })
    }

    pub fn is_memory(&self) -> bool {
        self.path == MEMORY_PATH
    }

    /// URL of the whole store.
    pub fn store_url(&self) -> String {
        format!("{}{}", URL_SCHEME, self.path)
    }

    /// Normalized URL of the package.
    pub fn package_url(&self) -> String {
        if self.package_id.is_empty() {
            self.store_url()
        } else {
            format!("{}{};{}", URL_SCHEME, self.path, self.package_id)
        }
    }
}

/// One SQLite database holding any number of packages.
#[derive(Debug)]
pub struct SqliteBackend {
    url: String,
    conn: Mutex<Connection>,
    bound: Mutex<HashSet<String>>,
}

impl SqliteBackend {
    fn open_store(location: &SqliteUrl, create: bool, config: &StorageConfig) -> BackendResult<Self> {
        let url = location.store_url();
        let conn = if location.is_memory() {
            if !create {
                return Err(BackendError::NoSuchPackage(location.package_url()));
            }
            Connection::open_in_memory().map_err(BackendError::internal("open_in_memory"))?
        } else {
            if !create && !Path::new(&location.path).exists() {
                return Err(BackendError::NoSuchPackage(location.package_url()));
            }
            Connection::open(PathBuf::from(&location.path))
                .map_err(BackendError::internal("open"))?
        };

        Self::check_format(&conn, &url, create)?;
        Self::configure(&conn, location.is_memory(), config)?;
        Ok(Self {
            url,
            conn: Mutex::new(conn),
            bound: Mutex::new(HashSet::new()),
        })
    }

    /// Check the version table, initializing empty databases when creating.
    fn check_format(conn: &Connection, url: &str, create: bool) -> BackendResult<()> {
        let table_count: i64 = conn
            .query_row("SELECT COUNT(*) FROM sqlite_master", [], |row| row.get(0))
            .map_err(|e| match e {
                rusqlite::Error::SqliteFailure(ref err, _)
                    if err.code == rusqlite::ErrorCode::NotADatabase =>
                {
                    BackendError::WrongFormat(url.to_string())
                }
                other => BackendError::Internal {
                    context: "read schema".to_string(),
                    source: other,
                },
            })?;

        if table_count == 0 {
            if !create {
                return Err(BackendError::NoSuchPackage(url.to_string()));
            }
            conn.execute_batch(Schema::create_tables())
                .map_err(BackendError::internal("init_schema"))?;
            conn.execute("INSERT INTO version (version) VALUES (?1)", [BACKEND_VERSION])
                .map_err(BackendError::internal("set version"))?;
            tracing::info!("initialized sqlite store {}", url);
            return Ok(());
        }

        let version: Option<String> = conn
            .query_row("SELECT version FROM version", [], |row| row.get(0))
            .optional()
            .map_err(|_| BackendError::WrongFormat(url.to_string()))?;
        match version.as_deref() {
            Some(BACKEND_VERSION) => Ok(()),
            other => {
                tracing::warn!("{} has backend version {:?}, expected {}", url, other, BACKEND_VERSION);
                Err(BackendError::WrongFormat(url.to_string()))
            }
        }
    }

    fn configure(conn: &Connection, memory: bool, config: &StorageConfig) -> BackendResult<()> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(BackendError::internal("foreign_keys"))?;
        conn.busy_timeout(Duration::from_millis(u64::from(config.busy_timeout_ms)))
            .map_err(BackendError::internal("busy_timeout"))?;
        if !memory {
            conn.execute_batch(&format!(
                "PRAGMA journal_mode = {};",
                config.journal_mode.to_ascii_uppercase()
            ))
            .map_err(BackendError::internal("journal_mode"))?;
        }
        Ok(())
    }

    fn package_exists(conn: &Connection, package: &str) -> BackendResult<bool> {
        conn.query_row(
            "SELECT COUNT(*) FROM packages WHERE id = ?1",
            params![package],
            |row| row.get::<_, i64>(0),
        )
        .map(|c| c > 0)
        .map_err(BackendError::internal("check package"))
    }

    fn bind(&self, package: &str, package_url: &str) -> BackendResult<()> {
        let mut bound = lock(&self.bound);
        if !bound.insert(package.to_string()) {
            return Err(BackendError::PackageInUse(package_url.to_string()));
        }
        Ok(())
    }

    fn is_bound(&self, package: &str) -> bool {
        lock(&self.bound).contains(package)
    }

    fn row_to_element(row: &rusqlite::Row<'_>) -> rusqlite::Result<ElementRow> {
        let package: String = row.get(0)?;
        let id: String = row.get(1)?;
        let code: String = row.get(2)?;
        let kind = ElementKind::from_code(&code).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                2,
                rusqlite::types::Type::Text,
                format!("unknown element kind {:?}", code).into(),
            )
        })?;
        let text = |idx: usize| -> rusqlite::Result<String> {
            Ok(row.get::<_, Option<String>>(idx)?.unwrap_or_default())
        };
        let data = match kind {
            ElementKind::Media => ElementData::Media {
                url: text(3)?,
                frame_of_reference: text(4)?,
            },
            ElementKind::Annotation => ElementData::Annotation {
                media: text(5)?,
                begin: row.get::<_, Option<i64>>(6)?.unwrap_or_default(),
                end: row.get::<_, Option<i64>>(7)?.unwrap_or_default(),
            },
            ElementKind::Relation => ElementData::Relation,
            ElementKind::Tag => ElementData::Tag,
            ElementKind::List => ElementData::List,
            ElementKind::View => ElementData::View,
            ElementKind::Query => ElementData::Query,
            ElementKind::Resource => ElementData::Resource,
            ElementKind::Import => ElementData::Import {
                url: text(8)?,
                uri: text(9)?,
            },
            ElementKind::Stream => ElementData::Stream { url: text(10)? },
        };
        Ok(ElementRow { package, id, data })
    }

    fn query_elements(
        conn: &Connection,
        filter: &str,
        order: &str,
        values: Vec<Value>,
    ) -> BackendResult<Vec<ElementRow>> {
        let sql = format!("{} WHERE {} ORDER BY {}", ELEMENT_SELECT, filter, order);
        let mut stmt = conn
            .prepare(&sql)
            .map_err(BackendError::internal("prepare elements"))?;
        let rows = stmt
            .query_map(params_from_iter(values), Self::row_to_element)
            .map_err(BackendError::internal("query elements"))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(BackendError::internal("collect elements"))?;
        Ok(rows)
    }

    fn query_pairs(conn: &Connection, sql: &str, values: Vec<Value>) -> BackendResult<Vec<(String, String)>> {
        let mut stmt = conn
            .prepare(sql)
            .map_err(BackendError::internal("prepare pairs"))?;
        let rows = stmt
            .query_map(params_from_iter(values), |row| Ok((row.get(0)?, row.get(1)?)))
            .map_err(BackendError::internal("query pairs"))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(BackendError::internal("collect pairs"))?;
        Ok(rows)
    }

    fn not_found(package: &str, id: &str) -> BackendError {
        BackendError::NotFound {
            package: package.to_string(),
            id: id.to_string(),
        }
    }

    fn expect_updated(count: usize, package: &str, id: &str) -> BackendResult<()> {
        if count == 0 {
            Err(Self::not_found(package, id))
        } else {
            Ok(())
        }
    }

    fn insert_details(
        conn: &Connection,
        package: &str,
        id: &str,
        data: &ElementData,
    ) -> rusqlite::Result<()> {
        match data {
            ElementData::Media {
                url,
                frame_of_reference,
            } => {
                conn.execute(
                    "INSERT INTO medias (package, id, url, foref) VALUES (?1, ?2, ?3, ?4)",
                    params![package, id, url, frame_of_reference],
                )?;
            }
            ElementData::Annotation { media, begin, end } => {
                conn.execute(
                    "INSERT INTO annotations (package, id, media, fbegin, fend) VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![package, id, media, begin, end],
                )?;
            }
            ElementData::Import { url, uri } => {
                conn.execute(
                    "INSERT INTO imports (package, id, url, uri) VALUES (?1, ?2, ?3, ?4)",
                    params![package, id, url, uri],
                )?;
            }
            ElementData::Stream { url } => {
                conn.execute(
                    "INSERT INTO streams (package, id, url) VALUES (?1, ?2, ?3)",
                    params![package, id, url],
                )?;
            }
            ElementData::Relation
            | ElementData::Tag
            | ElementData::List
            | ElementData::View
            | ElementData::Query
            | ElementData::Resource => {}
        }
        Ok(())
    }
}

const ELEMENT_SELECT: &str = "SELECT e.package, e.id, e.kind, m.url, m.foref, a.media, a.fbegin, a.fend, i.url, i.uri, s.url
    FROM elements e
    LEFT JOIN medias m ON m.package = e.package AND m.id = e.id
    LEFT JOIN annotations a ON a.package = e.package AND a.id = e.id
    LEFT JOIN imports i ON i.package = e.package AND i.id = e.id
    LEFT JOIN streams s ON s.package = e.package AND s.id = e.id";

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn text_values<'a>(items: impl IntoIterator<Item = &'a str>) -> Vec<Value> {
    items
        .into_iter()
        .map(|s| Value::Text(s.to_string()))
        .collect()
}

/// `(col_a = ? AND col_b = ?) OR ...` over a list of pairs.
fn pair_filter(pairs: &[(String, String)], col_a: &str, col_b: &str) -> (String, Vec<Value>) {
    let clause = pairs
        .iter()
        .map(|_| format!("({} = ? AND {} = ?)", col_a, col_b))
        .collect::<Vec<_>>()
        .join(" OR ");
    let values = pairs
        .iter()
        .flat_map(|(a, b)| [Value::Text(a.clone()), Value::Text(b.clone())])
        .collect();
    (clause, values)
}

impl Backend for SqliteBackend {
    fn url(&self) -> &str {
        &self.url
    }

    fn release(&self, package: &str) {
        if lock(&self.bound).remove(package) {
            tracing::debug!("released package {:?} of {}", package, self.url);
        }
    }

    fn delete_package(&self, package: &str) -> BackendResult<()> {
        let conn = lock(&self.conn);
        conn.execute("DELETE FROM packages WHERE id = ?1", params![package])
            .map_err(BackendError::internal("delete package"))?;
        drop(conn);
        self.release(package);
        tracing::info!("deleted package {:?} from {}", package, self.url);
        Ok(())
    }

    fn clear_package(&self, package: &str) -> BackendResult<()> {
        let conn = lock(&self.conn);
        let tx = conn
            .unchecked_transaction()
            .map_err(BackendError::internal("begin tx"))?;
        for sql in [
            "DELETE FROM elements WHERE package = ?1",
            "DELETE FROM meta WHERE package = ?1",
            "DELETE FROM tagged WHERE package = ?1",
        ] {
            tx.execute(sql, params![package])
                .map_err(BackendError::internal("clear package"))?;
        }
        tx.commit().map_err(BackendError::internal("commit"))
    }

    fn get_uri(&self, package: &str) -> BackendResult<String> {
        let conn = lock(&self.conn);
        conn.query_row(
            "SELECT uri FROM packages WHERE id = ?1",
            params![package],
            |row| row.get(0),
        )
        .optional()
        .map_err(BackendError::internal("get uri"))?
        .ok_or_else(|| BackendError::NoSuchPackage(package.to_string()))
    }

    fn update_uri(&self, package: &str, uri: &str) -> BackendResult<()> {
        let conn = lock(&self.conn);
        let n = conn
            .execute("UPDATE packages SET uri = ?2 WHERE id = ?1", params![package, uri])
            .map_err(BackendError::internal("update uri"))?;
        if n == 0 {
            return Err(BackendError::NoSuchPackage(package.to_string()));
        }
        Ok(())
    }

    fn update_url(&self, package: &str, url: &str) -> BackendResult<()> {
        let conn = lock(&self.conn);
        let n = conn
            .execute("UPDATE packages SET url = ?2 WHERE id = ?1", params![package, url])
            .map_err(BackendError::internal("update url"))?;
        if n == 0 {
            return Err(BackendError::NoSuchPackage(package.to_string()));
        }
        Ok(())
    }

    fn create_element(
        &self,
        package: &str,
        id: &str,
        data: &ElementData,
        content: Option<&ContentRow>,
    ) -> BackendResult<()> {
        let conn = lock(&self.conn);
        let tx = conn
            .unchecked_transaction()
            .map_err(BackendError::internal("begin tx"))?;

        tx.execute(
            "INSERT INTO elements (package, id, kind) VALUES (?1, ?2, ?3)",
            params![package, id, data.kind().code()],
        )
        .map_err(|e| {
            if let rusqlite::Error::SqliteFailure(ref err, _) = e {
                if err.code == rusqlite::ErrorCode::ConstraintViolation {
                    return BackendError::DuplicateId {
                        package: package.to_string(),
                        id: id.to_string(),
                    };
                }
            }
            BackendError::Internal {
                context: "insert element".to_string(),
                source: e,
            }
        })?;

        Self::insert_details(&tx, package, id, data)
            .map_err(BackendError::internal("insert element details"))?;

        if let Some(content) = content {
            tx.execute(
                "INSERT INTO contents (package, element, mimetype, data, schema_ref) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![package, id, content.mimetype, content.data, content.schema],
            )
            .map_err(BackendError::internal("insert content"))?;
        }

        tx.commit().map_err(BackendError::internal("commit"))
    }

    fn has_element(&self, package: &str, id: &str) -> BackendResult<Option<ElementKind>> {
        let conn = lock(&self.conn);
        let code: Option<String> = conn
            .query_row(
                "SELECT kind FROM elements WHERE package = ?1 AND id = ?2",
                params![package, id],
                |row| row.get(0),
            )
            .optional()
            .map_err(BackendError::internal("has element"))?;
        Ok(code.as_deref().and_then(ElementKind::from_code))
    }

    fn get_element(&self, package: &str, id: &str) -> BackendResult<Option<ElementRow>> {
        let conn = lock(&self.conn);
        let rows = Self::query_elements(
            &conn,
            "e.package = ? AND e.id = ?",
            "e.id",
            text_values([package, id]),
        )?;
        Ok(rows.into_iter().next())
    }

    fn iter_elements(
        &self,
        packages: &[&str],
        kind: Option<ElementKind>,
    ) -> BackendResult<Vec<ElementRow>> {
        if packages.is_empty() {
            return Ok(Vec::new());
        }
        let conn = lock(&self.conn);
        let mut filter = format!("e.package IN ({})", placeholders(packages.len()));
        let mut values = text_values(packages.iter().copied());
        if let Some(kind) = kind {
            filter.push_str(" AND e.kind = ?");
            values.push(Value::Text(kind.code().to_string()));
        }
        Self::query_elements(&conn, &filter, "e.package, e.id", values)
    }

    fn iter_annotations(
        &self,
        packages: &[&str],
        query: &AnnotationQuery,
    ) -> BackendResult<Vec<ElementRow>> {
        if packages.is_empty() {
            return Ok(Vec::new());
        }
        let conn = lock(&self.conn);
        let mut filter = format!(
            "e.kind = ? AND e.package IN ({})",
            placeholders(packages.len())
        );
        let mut values = vec![Value::Text(ElementKind::Annotation.code().to_string())];
        values.extend(text_values(packages.iter().copied()));

        if !query.medias.is_empty() {
            let (clause, pair_values) = pair_filter(&query.medias, "e.package", "a.media");
            filter.push_str(&format!(" AND ({})", clause));
            values.extend(pair_values);
        }
        let bounds = [
            ("a.fbegin >= ?", query.begin_min),
            ("a.fbegin <= ?", query.begin_max),
            ("a.fend >= ?", query.end_min),
            ("a.fend <= ?", query.end_max),
        ];
        for (clause, bound) in bounds {
            if let Some(value) = bound {
                filter.push_str(" AND ");
                filter.push_str(clause);
                values.push(Value::Integer(value));
            }
        }
        Self::query_elements(
            &conn,
            &filter,
            "a.fbegin, a.fend, a.media, e.package, e.id",
            values,
        )
    }

    fn delete_element(&self, package: &str, id: &str) -> BackendResult<()> {
        let conn = lock(&self.conn);
        let tx = conn
            .unchecked_transaction()
            .map_err(BackendError::internal("begin tx"))?;
        let n = tx
            .execute(
                "DELETE FROM elements WHERE package = ?1 AND id = ?2",
                params![package, id],
            )
            .map_err(BackendError::internal("delete element"))?;
        if n == 0 {
            return Err(Self::not_found(package, id));
        }
        tx.execute(
            "DELETE FROM meta WHERE package = ?1 AND element = ?2",
            params![package, id],
        )
        .map_err(BackendError::internal("delete element meta"))?;
        tx.execute(
            "DELETE FROM tagged WHERE package = ?1 AND element = ?2",
            params![package, id],
        )
        .map_err(BackendError::internal("delete element tags"))?;
        tx.commit().map_err(BackendError::internal("commit"))
    }

    fn count_references(&self, package: &str, idref: &str) -> BackendResult<usize> {
        let conn = lock(&self.conn);
        let count: i64 = conn
            .query_row(
                "SELECT
                    (SELECT COUNT(*) FROM annotations WHERE package = ?1 AND media = ?2)
                  + (SELECT COUNT(*) FROM items WHERE package = ?1 AND item = ?2)
                  + (SELECT COUNT(*) FROM tagged WHERE package = ?1 AND tag = ?2)
                  + (SELECT COUNT(*) FROM contents WHERE package = ?1 AND schema_ref = ?2)
                  + (SELECT COUNT(*) FROM meta WHERE package = ?1 AND is_idref = 1 AND value = ?2)",
                params![package, idref],
                |row| row.get(0),
            )
            .map_err(BackendError::internal("count references"))?;
        Ok(count as usize)
    }

    fn update_media(
        &self,
        package: &str,
        id: &str,
        url: &str,
        frame_of_reference: &str,
    ) -> BackendResult<()> {
        let conn = lock(&self.conn);
        let n = conn
            .execute(
                "UPDATE medias SET url = ?3, foref = ?4 WHERE package = ?1 AND id = ?2",
                params![package, id, url, frame_of_reference],
            )
            .map_err(BackendError::internal("update media"))?;
        Self::expect_updated(n, package, id)
    }

    fn update_annotation(
        &self,
        package: &str,
        id: &str,
        media: &str,
        begin: i64,
        end: i64,
    ) -> BackendResult<()> {
        let conn = lock(&self.conn);
        let n = conn
            .execute(
                "UPDATE annotations SET media = ?3, fbegin = ?4, fend = ?5 WHERE package = ?1 AND id = ?2",
                params![package, id, media, begin, end],
            )
            .map_err(BackendError::internal("update annotation"))?;
        Self::expect_updated(n, package, id)
    }

    fn update_import(&self, package: &str, id: &str, url: &str, uri: &str) -> BackendResult<()> {
        let conn = lock(&self.conn);
        let n = conn
            .execute(
                "UPDATE imports SET url = ?3, uri = ?4 WHERE package = ?1 AND id = ?2",
                params![package, id, url, uri],
            )
            .map_err(BackendError::internal("update import"))?;
        Self::expect_updated(n, package, id)
    }

    fn update_stream(&self, package: &str, id: &str, url: &str) -> BackendResult<()> {
        let conn = lock(&self.conn);
        let n = conn
            .execute(
                "UPDATE streams SET url = ?3 WHERE package = ?1 AND id = ?2",
                params![package, id, url],
            )
            .map_err(BackendError::internal("update stream"))?;
        Self::expect_updated(n, package, id)
    }

    fn get_content(&self, package: &str, id: &str) -> BackendResult<Option<ContentRow>> {
        let conn = lock(&self.conn);
        conn.query_row(
            "SELECT mimetype, data, schema_ref FROM contents WHERE package = ?1 AND element = ?2",
            params![package, id],
            |row| {
                Ok(ContentRow {
                    mimetype: row.get(0)?,
                    data: row.get(1)?,
                    schema: row.get(2)?,
                })
            },
        )
        .optional()
        .map_err(BackendError::internal("get content"))
    }

    fn update_content(&self, package: &str, id: &str, content: &ContentRow) -> BackendResult<()> {
        let conn = lock(&self.conn);
        conn.execute(
            "INSERT INTO contents (package, element, mimetype, data, schema_ref)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(package, element) DO UPDATE SET
                mimetype = excluded.mimetype,
                data = excluded.data,
                schema_ref = excluded.schema_ref",
            params![package, id, content.mimetype, content.data, content.schema],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(ref err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Self::not_found(package, id)
            }
            other => BackendError::Internal {
                context: "update content".to_string(),
                source: other,
            },
        })?;
        Ok(())
    }

    fn get_meta(
        &self,
        package: &str,
        element: &str,
        key: &str,
    ) -> BackendResult<Option<MetaValue>> {
        let conn = lock(&self.conn);
        conn.query_row(
            "SELECT value, is_idref FROM meta WHERE package = ?1 AND element = ?2 AND key = ?3",
            params![package, element, key],
            |row| meta_from_row(row, 0),
        )
        .optional()
        .map_err(BackendError::internal("get meta"))
    }

    fn iter_meta(&self, package: &str, element: &str) -> BackendResult<Vec<(String, MetaValue)>> {
        let conn = lock(&self.conn);
        let mut stmt = conn
            .prepare(
                "SELECT key, value, is_idref FROM meta WHERE package = ?1 AND element = ?2 ORDER BY key",
            )
            .map_err(BackendError::internal("prepare meta"))?;
        let rows = stmt
            .query_map(params![package, element], |row| {
                Ok((row.get(0)?, meta_from_row(row, 1)?))
            })
            .map_err(BackendError::internal("query meta"))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(BackendError::internal("collect meta"))?;
        Ok(rows)
    }

    fn set_meta(
        &self,
        package: &str,
        element: &str,
        key: &str,
        value: Option<&MetaValue>,
    ) -> BackendResult<()> {
        let conn = lock(&self.conn);
        match value {
            Some(value) => conn.execute(
                "INSERT INTO meta (package, element, key, value, is_idref) VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(package, element, key) DO UPDATE SET
                    value = excluded.value,
                    is_idref = excluded.is_idref",
                params![package, element, key, value.as_str(), value.is_idref()],
            ),
            None => conn.execute(
                "DELETE FROM meta WHERE package = ?1 AND element = ?2 AND key = ?3",
                params![package, element, key],
            ),
        }
        .map_err(BackendError::internal("set meta"))?;
        Ok(())
    }

    fn iter_items(&self, package: &str, owner: &str) -> BackendResult<Vec<String>> {
        let conn = lock(&self.conn);
        let mut stmt = conn
            .prepare("SELECT item FROM items WHERE package = ?1 AND owner = ?2 ORDER BY ord")
            .map_err(BackendError::internal("prepare items"))?;
        let rows = stmt
            .query_map(params![package, owner], |row| row.get(0))
            .map_err(BackendError::internal("query items"))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(BackendError::internal("collect items"))?;
        Ok(rows)
    }

    fn count_items(&self, package: &str, owner: &str) -> BackendResult<usize> {
        let conn = lock(&self.conn);
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM items WHERE package = ?1 AND owner = ?2",
                params![package, owner],
                |row| row.get(0),
            )
            .map_err(BackendError::internal("count items"))?;
        Ok(count as usize)
    }

    fn insert_item(
        &self,
        package: &str,
        owner: &str,
        position: usize,
        idref: &str,
    ) -> BackendResult<()> {
        let conn = lock(&self.conn);
        let tx = conn
            .unchecked_transaction()
            .map_err(BackendError::internal("begin tx"))?;
        let count: i64 = tx
            .query_row(
                "SELECT COUNT(*) FROM items WHERE package = ?1 AND owner = ?2",
                params![package, owner],
                |row| row.get(0),
            )
            .map_err(BackendError::internal("count items"))?;
        let position = (position as i64).min(count);
        tx.execute(
            "UPDATE items SET ord = ord + 1 WHERE package = ?1 AND owner = ?2 AND ord >= ?3",
            params![package, owner, position],
        )
        .map_err(BackendError::internal("shift items"))?;
        tx.execute(
            "INSERT INTO items (package, owner, ord, item) VALUES (?1, ?2, ?3, ?4)",
            params![package, owner, position, idref],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(ref err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Self::not_found(package, owner)
            }
            other => BackendError::Internal {
                context: "insert item".to_string(),
                source: other,
            },
        })?;
        tx.commit().map_err(BackendError::internal("commit"))
    }

    fn update_item(
        &self,
        package: &str,
        owner: &str,
        position: usize,
        idref: &str,
    ) -> BackendResult<()> {
        let conn = lock(&self.conn);
        let n = conn
            .execute(
                "UPDATE items SET item = ?4 WHERE package = ?1 AND owner = ?2 AND ord = ?3",
                params![package, owner, position as i64, idref],
            )
            .map_err(BackendError::internal("update item"))?;
        Self::expect_updated(n, package, &format!("{}[{}]", owner, position))
    }

    fn remove_item(&self, package: &str, owner: &str, position: usize) -> BackendResult<()> {
        let conn = lock(&self.conn);
        let tx = conn
            .unchecked_transaction()
            .map_err(BackendError::internal("begin tx"))?;
        let n = tx
            .execute(
                "DELETE FROM items WHERE package = ?1 AND owner = ?2 AND ord = ?3",
                params![package, owner, position as i64],
            )
            .map_err(BackendError::internal("remove item"))?;
        Self::expect_updated(n, package, &format!("{}[{}]", owner, position))?;
        tx.execute(
            "UPDATE items SET ord = ord - 1 WHERE package = ?1 AND owner = ?2 AND ord > ?3",
            params![package, owner, position as i64],
        )
        .map_err(BackendError::internal("shift items"))?;
        tx.commit().map_err(BackendError::internal("commit"))
    }

    fn iter_owners_with_item(
        &self,
        items: &[(String, String)],
        kind: ElementKind,
    ) -> BackendResult<Vec<(String, String)>> {
        if items.is_empty() {
            return Ok(Vec::new());
        }
        let conn = lock(&self.conn);
        let (clause, pair_values) = pair_filter(items, "i.package", "i.item");
        let sql = format!(
            "SELECT DISTINCT i.package, i.owner FROM items i
             JOIN elements e ON e.package = i.package AND e.id = i.owner
             WHERE e.kind = ? AND ({})
             ORDER BY i.package, i.owner",
            clause
        );
        let mut values = vec![Value::Text(kind.code().to_string())];
        values.extend(pair_values);
        Self::query_pairs(&conn, &sql, values)
    }

    fn associate_tag(&self, package: &str, element: &str, tag: &str) -> BackendResult<()> {
        let conn = lock(&self.conn);
        conn.execute(
            "INSERT OR IGNORE INTO tagged (package, element, tag) VALUES (?1, ?2, ?3)",
            params![package, element, tag],
        )
        .map_err(BackendError::internal("associate tag"))?;
        Ok(())
    }

    fn dissociate_tag(&self, package: &str, element: &str, tag: &str) -> BackendResult<()> {
        let conn = lock(&self.conn);
        conn.execute(
            "DELETE FROM tagged WHERE package = ?1 AND element = ?2 AND tag = ?3",
            params![package, element, tag],
        )
        .map_err(BackendError::internal("dissociate tag"))?;
        Ok(())
    }

    fn retag(
        &self,
        package: &str,
        element: &str,
        old: Option<&str>,
        new: Option<&str>,
    ) -> BackendResult<()> {
        let conn = lock(&self.conn);
        let tx = conn
            .unchecked_transaction()
            .map_err(BackendError::internal("begin tx"))?;
        if let Some(old) = old {
            tx.execute(
                "DELETE FROM tagged WHERE package = ?1 AND element = ?2 AND tag = ?3",
                params![package, element, old],
            )
            .map_err(BackendError::internal("retag dissociate"))?;
        }
        if let Some(new) = new {
            tx.execute(
                "INSERT OR IGNORE INTO tagged (package, element, tag) VALUES (?1, ?2, ?3)",
                params![package, element, new],
            )
            .map_err(BackendError::internal("retag associate"))?;
        }
        tx.commit().map_err(BackendError::internal("commit"))
    }

    fn iter_elements_with_tag(
        &self,
        tags: &[(String, String)],
    ) -> BackendResult<Vec<(String, String)>> {
        if tags.is_empty() {
            return Ok(Vec::new());
        }
        let conn = lock(&self.conn);
        let (clause, values) = pair_filter(tags, "package", "tag");
        let sql = format!(
            "SELECT DISTINCT package, element FROM tagged WHERE {} ORDER BY package, element",
            clause
        );
        Self::query_pairs(&conn, &sql, values)
    }

    fn iter_tags_with_element(
        &self,
        elements: &[(String, String)],
    ) -> BackendResult<Vec<(String, String)>> {
        if elements.is_empty() {
            return Ok(Vec::new());
        }
        let conn = lock(&self.conn);
        let (clause, values) = pair_filter(elements, "package", "element");
        let sql = format!(
            "SELECT DISTINCT package, tag FROM tagged WHERE {} ORDER BY package, tag",
            clause
        );
        Self::query_pairs(&conn, &sql, values)
    }

    fn iter_taggings(&self, package: &str) -> BackendResult<Vec<(String, String)>> {
        let conn = lock(&self.conn);
        Self::query_pairs(
            &conn,
            "SELECT element, tag FROM tagged WHERE package = ? ORDER BY element, tag",
            text_values([package]),
        )
    }
}

fn meta_from_row(row: &rusqlite::Row<'_>, first: usize) -> rusqlite::Result<MetaValue> {
    let value: String = row.get(first)?;
    let is_idref: bool = row.get(first + 1)?;
    Ok(if is_idref {
        MetaValue::IdRef(value)
    } else {
        MetaValue::Text(value)
    })
}

/// Opens SQLite stores, sharing one [`SqliteBackend`] per database file.
#[derive(Default)]
pub struct SqliteFactory {
    stores: Mutex<HashMap<String, Weak<SqliteBackend>>>,
}

impl SqliteFactory {
    pub fn new() -> Self {
        Self::default()
    }

    fn store(
        stores: &mut HashMap<String, Weak<SqliteBackend>>,
        location: &SqliteUrl,
        create: bool,
        config: &StorageConfig,
    ) -> BackendResult<Arc<SqliteBackend>> {
        stores.retain(|_, weak| weak.strong_count() > 0);
        if let Some(store) = stores.get(&location.path).and_then(Weak::upgrade) {
            return Ok(store);
        }
        let store = Arc::new(SqliteBackend::open_store(location, create, config)?);
        stores.insert(location.path.clone(), Arc::downgrade(&store));
        Ok(store)
    }
}

impl BackendFactory for SqliteFactory {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn claims_for(&self, url: &str) -> u8 {
        match SqliteUrl::parse(url) {
            Ok(_) => 90,
            Err(_) => 0,
        }
    }

    fn create(&self, url: &str, config: &StorageConfig) -> BackendResult<Binding> {
        let location = SqliteUrl::parse(url)?;
        let package_url = location.package_url();
        let mut stores = lock(&self.stores);
        let store = Self::store(&mut stores, &location, true, config)?;
        if store.is_bound(&location.package_id) {
            return Err(BackendError::PackageInUse(package_url));
        }

        {
            let conn = lock(&store.conn);
            if SqliteBackend::package_exists(&conn, &location.package_id)? {
                return Err(BackendError::PackageInUse(package_url));
            }
            conn.execute(
                "INSERT INTO packages (id, uri, url) VALUES (?1, '', ?2)",
                params![location.package_id, package_url],
            )
            .map_err(BackendError::internal("insert package"))?;
        }

        store.bind(&location.package_id, &package_url)?;
        tracing::info!("created package {}", package_url);
        Ok(Binding {
            backend: store,
            package_id: location.package_id,
            url: package_url,
        })
    }

    fn open(&self, url: &str, config: &StorageConfig) -> BackendResult<Binding> {
        let location = SqliteUrl::parse(url)?;
        let package_url = location.package_url();
        let mut stores = lock(&self.stores);
        let store = Self::store(&mut stores, &location, false, config)?;

        {
            let conn = lock(&store.conn);
            if !SqliteBackend::package_exists(&conn, &location.package_id)? {
                return Err(BackendError::NoSuchPackage(package_url));
            }
        }

        store.bind(&location.package_id, &package_url)?;
        tracing::info!("opened package {}", package_url);
        Ok(Binding {
            backend: store,
            package_id: location.package_id,
            url: package_url,
        })
    }
}
