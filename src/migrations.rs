//! Numbered schema migrations for the engine database.
//!
//! Each migration is a SQL file embedded with `include_str!` and keyed by a
//! version; the `schema_version` table records what has run, so a migration
//! executes at most once per database. Databases that predate the version
//! table (the intake platform created the case tables first) are adopted by
//! stamping the baseline version instead of replaying its SQL. Before any
//! pending migration runs, the file is copied aside with SQLite's online
//! backup API.

use rusqlite::Connection;

const MIGRATIONS: &[(i32, &str)] = &[(1, include_str!("migrations/001_baseline.sql"))];

/// Highest applied version, creating the version table on first contact.
fn applied_version(conn: &Connection) -> Result<i32, String> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )
    .map_err(|e| format!("Failed to initialize schema_version: {}", e))?;

    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
    .map_err(|e| format!("Failed to read schema_version: {}", e))
}

/// Stamp the baseline as applied on a database that predates the version
/// table.
///
/// The intake platform owned this file before the engine grew migrations, so
/// a `cases` table with no recorded version means the baseline schema is
/// already in place and its SQL must not replay.
fn adopt_unversioned_db(conn: &Connection) -> Result<bool, String> {
    let preexisting = conn
        .prepare("SELECT 1 FROM cases LIMIT 1")
        .and_then(|mut stmt| stmt.exists([]))
        .unwrap_or(false);
    if !preexisting {
        return Ok(false);
    }

    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (1)",
        [],
    )
    .map_err(|e| format!("Failed to stamp baseline version: {}", e))?;
    log::info!("Migrations: adopted unversioned database at baseline v1");
    Ok(true)
}

/// Copy the database aside before schema changes touch it.
///
/// Goes through the online backup API so a live WAL database copies
/// consistently. The copy lands next to the file as
/// `<db>.pre-migration-v<current>.bak`, one per schema step, so a later
/// upgrade does not clobber the copy from an earlier one. In-memory and
/// temp databases have no file and are skipped.
fn snapshot_database(conn: &Connection, current: i32) -> Result<(), String> {
    let file: String = conn
        .query_row("PRAGMA database_list", [], |row| row.get(2))
        .map_err(|e| format!("Failed to resolve database file: {}", e))?;
    if file.is_empty() || file == ":memory:" {
        return Ok(());
    }

    let dest = format!("{}.pre-migration-v{}.bak", file, current);
    let mut out = Connection::open(&dest)
        .map_err(|e| format!("Failed to create backup at {}: {}", dest, e))?;
    rusqlite::backup::Backup::new(conn, &mut out)
        .and_then(|b| b.step(-1))
        .map_err(|e| format!("Backup before migration failed: {}", e))?;

    log::info!("Migrations: copied database to {} before upgrade", dest);
    Ok(())
}

/// Bring the schema up to the latest version this build knows.
///
/// Returns how many migrations ran. Refuses a database stamped newer than
/// the build, so an older binary cannot apply its view of the schema onto a
/// newer file.
pub fn run_migrations(conn: &Connection) -> Result<usize, String> {
    let mut current = applied_version(conn)?;
    if current == 0 && adopt_unversioned_db(conn)? {
        current = 1;
    }

    let latest = MIGRATIONS
        .iter()
        .map(|&(version, _)| version)
        .max()
        .unwrap_or(0);
    if current > latest {
        return Err(format!(
            "Database schema is at v{} but this build of caseintel only knows v{}; \
             the file was written by a newer engine. Update caseintel before opening it.",
            current, latest
        ));
    }
    if current == latest {
        return Ok(0);
    }

    snapshot_database(conn, current)?;

    let mut applied = 0;
    for &(version, sql) in MIGRATIONS {
        if version <= current {
            continue;
        }
        conn.execute_batch(sql)
            .map_err(|e| format!("Migration v{} failed: {}", version, e))?;
        conn.execute(
            "INSERT INTO schema_version (version) VALUES (?1)",
            [version],
        )
        .map_err(|e| format!("Failed to record v{} in schema_version: {}", version, e))?;
        log::info!("Migrations: applied v{}", version);
        applied += 1;
    }

    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn mem_db() -> Connection {
        Connection::open_in_memory().expect("in-memory db")
    }

    #[test]
    fn test_fresh_db_applies_baseline() {
        let conn = mem_db();
        let applied = run_migrations(&conn).expect("migrations should succeed");
        assert_eq!(applied, 1, "should apply exactly 1 migration (baseline)");

        let version = applied_version(&conn).expect("version query");
        assert_eq!(version, 1);

        // Verify key tables exist with correct columns
        let signal_count: i32 = conn
            .query_row("SELECT COUNT(*) FROM case_signals", [], |row| row.get(0))
            .expect("case_signals table should exist");
        assert_eq!(signal_count, 0);

        // Verify case_signals has the generation columns
        conn.execute(
            "INSERT INTO case_signals (id, case_id, decision_type, signal_type, source_type,
             observed_at, strength, complete, metadata, generation, superseded_by, created_at)
             VALUES ('s1', 'case-1', 'csf', 'submission_present', 'submission',
             '2026-01-01T00:00:00Z', 1.0, 1, NULL, 'gen-1', NULL, '2026-01-01T00:00:00Z')",
            [],
        )
        .expect("case_signals should have generation and superseded_by");

        // Verify decision_intelligence composite key and JSON columns
        conn.execute(
            "INSERT INTO decision_intelligence (case_id, decision_type, computed_at, updated_at,
             completeness_score, confidence_score, confidence_band, gaps, gap_severity_score,
             bias_flags, narrative, explanation_factors, stale_after_minutes)
             VALUES ('case-1', 'csf', '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z',
             100.0, 80.0, 'high', '[]', 0.0, '[]', 'ok', '[]', 30)",
            [],
        )
        .expect("decision_intelligence should have all columns");

        // Verify audit_log shape
        conn.execute(
            "INSERT INTO audit_log (id, case_id, event_type, actor, payload, created_at)
             VALUES ('a1', 'case-1', 'intelligence_recomputed', 'system', '{}', '2026-01-01T00:00:00Z')",
            [],
        )
        .expect("audit_log table should exist");

        // Verify case artifact tables
        conn.execute(
            "INSERT INTO cases (id, decision_type, status, created_at, updated_at)
             VALUES ('case-1', 'csf', 'submitted', '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')",
            [],
        )
        .expect("cases table should exist");
        conn.execute(
            "INSERT INTO case_info_requests (id, case_id, status, opened_at)
             VALUES ('rfi-1', 'case-1', 'open', '2026-01-01T00:00:00Z')",
            [],
        )
        .expect("case_info_requests table should exist");
    }

    #[test]
    fn test_adopts_unversioned_platform_db() {
        let conn = mem_db();

        // The intake platform created and populated cases before the engine
        // ever opened this file
        conn.execute_batch(
            "CREATE TABLE cases (
                id TEXT PRIMARY KEY,
                decision_type TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            INSERT INTO cases (id, decision_type, status, created_at, updated_at)
            VALUES ('existing', 'csf', 'submitted', '2026-01-01', '2026-01-01');",
        )
        .expect("seed existing db");

        // Adoption stamps v1 without replaying the baseline SQL
        let applied = run_migrations(&conn).expect("migrations should succeed");
        assert_eq!(applied, 0);
        assert_eq!(applied_version(&conn).expect("version query"), 1);

        // Platform data untouched
        let status: String = conn
            .query_row("SELECT status FROM cases WHERE id = 'existing'", [], |row| {
                row.get(0)
            })
            .expect("existing data should be preserved");
        assert_eq!(status, "submitted");
    }

    #[test]
    fn test_newer_schema_is_refused() {
        let conn = mem_db();
        run_migrations(&conn).expect("baseline");
        conn.execute("INSERT INTO schema_version (version) VALUES (7)", [])
            .expect("future version");

        let err = run_migrations(&conn).expect_err("should refuse a newer schema");
        assert!(err.contains("newer engine"), "unexpected message: {}", err);
        // The refusal must leave the version table alone
        assert_eq!(applied_version(&conn).expect("version query"), 7);
    }

    #[test]
    fn test_reopen_applies_nothing() {
        let conn = mem_db();
        assert_eq!(run_migrations(&conn).expect("first open"), 1);
        assert_eq!(run_migrations(&conn).expect("second open"), 0);

        conn.execute(
            "INSERT INTO cases (id, decision_type, status, created_at, updated_at)
             VALUES ('case-1', 'csf', 'submitted', '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')",
            [],
        )
        .expect("insert");

        // A third pass leaves both the version and the data alone
        assert_eq!(run_migrations(&conn).expect("third open"), 0);
        let status: String = conn
            .query_row("SELECT status FROM cases WHERE id = 'case-1'", [], |row| {
                row.get(0)
            })
            .expect("row survives reopen");
        assert_eq!(status, "submitted");
    }

    #[test]
    fn test_backup_written_before_first_migration() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db_path = dir.path().join("engine.db");
        let conn = Connection::open(&db_path).expect("open db");

        run_migrations(&conn).expect("baseline");

        let backup = dir.path().join("engine.db.pre-migration-v0.bak");
        assert!(backup.exists(), "expected backup at {}", backup.display());

        // The copy was taken before the baseline ran: it has the version
        // table but none of the engine schema
        let copy = Connection::open(&backup).expect("open backup");
        let versions: i32 = copy
            .query_row("SELECT COUNT(*) FROM schema_version", [], |row| row.get(0))
            .expect("backup should be a readable database");
        assert_eq!(versions, 0);
        assert!(copy.prepare("SELECT 1 FROM cases LIMIT 1").is_err());
    }
}
