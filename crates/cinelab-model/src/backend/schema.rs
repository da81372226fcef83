//! SQLite schema for package storage

/// Format version written in the `version` table. Stores carrying any other
/// value are rejected as wrong format.
pub const BACKEND_VERSION: &str = "0.1";

/// SQLite schema definition
pub struct Schema;

impl Schema {
    /// Get the complete schema SQL
    pub fn create_tables() -> &'static str {
        r#"
CREATE TABLE IF NOT EXISTS version (
    version TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS packages (
    id TEXT PRIMARY KEY,
    uri TEXT NOT NULL DEFAULT '',
    url TEXT NOT NULL DEFAULT ''
);

-- One row per element; the kind code selects the detail table
CREATE TABLE IF NOT EXISTS elements (
    package TEXT NOT NULL REFERENCES packages(id) ON DELETE CASCADE,
    id TEXT NOT NULL,
    kind TEXT NOT NULL,
    PRIMARY KEY (package, id)
);

CREATE INDEX IF NOT EXISTS idx_elements_kind ON elements(package, kind);

CREATE TABLE IF NOT EXISTS medias (
    package TEXT NOT NULL,
    id TEXT NOT NULL,
    url TEXT NOT NULL,
    foref TEXT NOT NULL,
    PRIMARY KEY (package, id),
    FOREIGN KEY (package, id) REFERENCES elements(package, id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS annotations (
    package TEXT NOT NULL,
    id TEXT NOT NULL,
    media TEXT NOT NULL,
    fbegin INTEGER NOT NULL,
    fend INTEGER NOT NULL,
    PRIMARY KEY (package, id),
    FOREIGN KEY (package, id) REFERENCES elements(package, id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_annotations_order ON annotations(package, fbegin, fend, media);

CREATE TABLE IF NOT EXISTS imports (
    package TEXT NOT NULL,
    id TEXT NOT NULL,
    url TEXT NOT NULL,
    uri TEXT NOT NULL DEFAULT '',
    PRIMARY KEY (package, id),
    FOREIGN KEY (package, id) REFERENCES elements(package, id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS streams (
    package TEXT NOT NULL,
    id TEXT NOT NULL,
    url TEXT NOT NULL,
    PRIMARY KEY (package, id),
    FOREIGN KEY (package, id) REFERENCES elements(package, id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS contents (
    package TEXT NOT NULL,
    element TEXT NOT NULL,
    mimetype TEXT NOT NULL,
    data TEXT NOT NULL DEFAULT '',
    schema_ref TEXT,
    PRIMARY KEY (package, element),
    FOREIGN KEY (package, element) REFERENCES elements(package, id) ON DELETE CASCADE
);

-- Package metadata uses the empty element id
CREATE TABLE IF NOT EXISTS meta (
    package TEXT NOT NULL REFERENCES packages(id) ON DELETE CASCADE,
    element TEXT NOT NULL,
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    is_idref INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (package, element, key)
);

-- Relation members and list items
CREATE TABLE IF NOT EXISTS items (
    package TEXT NOT NULL,
    owner TEXT NOT NULL,
    ord INTEGER NOT NULL,
    item TEXT NOT NULL,
    FOREIGN KEY (package, owner) REFERENCES elements(package, id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_items_owner ON items(package, owner, ord);

CREATE INDEX IF NOT EXISTS idx_items_item ON items(package, item);

CREATE TABLE IF NOT EXISTS tagged (
    package TEXT NOT NULL REFERENCES packages(id) ON DELETE CASCADE,
    element TEXT NOT NULL,
    tag TEXT NOT NULL,
    PRIMARY KEY (package, element, tag)
);

CREATE INDEX IF NOT EXISTS idx_tagged_tag ON tagged(package, tag);
"#
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_sql_valid() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch(Schema::create_tables()).unwrap();
        // Creating twice must be harmless
        conn.execute_batch(Schema::create_tables()).unwrap();
    }
}
