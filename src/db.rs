use std::collections::{BTreeSet, HashMap, HashSet};

use anyhow::Result;
use rusqlite::Connection;
use serde::Serialize;

const DB_PATH: &str = "data/course_ratings.sqlite";

pub fn connect() -> Result<Connection> {
    std::fs::create_dir_all("data")?;
    let conn = Connection::open(DB_PATH)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS course_fragments (
            filename       TEXT PRIMARY KEY,
            professor      TEXT NOT NULL DEFAULT 'Unknown',
            semester       TEXT NOT NULL DEFAULT 'Unknown',
            course_code    TEXT NOT NULL DEFAULT 'Unknown',
            section        TEXT NOT NULL DEFAULT 'Unknown',
            course_name    TEXT NOT NULL DEFAULT 'Unknown',
            overall_rating REAL,
            rmp_id         INTEGER,
            processed_at   TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_fragments_rmp ON course_fragments(rmp_id);
        CREATE INDEX IF NOT EXISTS idx_fragments_course ON course_fragments(course_code);

        CREATE TABLE IF NOT EXISTS rating_pages (
            rmp_id           INTEGER PRIMARY KEY,
            status           INTEGER,
            error            TEXT,
            overall_rating   TEXT,
            would_take_again TEXT,
            difficulty       TEXT,
            tags             TEXT,
            latency_ms       INTEGER,
            fetched_at       TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS enriched_courses (
            id                     INTEGER PRIMARY KEY,
            filename               TEXT NOT NULL,
            professor              TEXT NOT NULL,
            semester               TEXT NOT NULL,
            course_code            TEXT NOT NULL,
            section                TEXT NOT NULL,
            course_name            TEXT NOT NULL,
            overall_rating         REAL,
            rmp_id                 INTEGER,
            scraped_overall_rating TEXT,
            would_take_again       TEXT,
            difficulty             TEXT,
            tags                   TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_enriched_rmp ON enriched_courses(rmp_id);

        CREATE TABLE IF NOT EXISTS courses_standardized (
            filename               TEXT NOT NULL,
            professor_name         TEXT NOT NULL,
            full_professor_name    TEXT NOT NULL,
            course_code            TEXT NOT NULL,
            course_name            TEXT NOT NULL,
            semester               TEXT NOT NULL,
            section                TEXT NOT NULL,
            rmp_id                 INTEGER,
            overall_rating         REAL,
            scraped_overall_rating REAL,
            would_take_again       REAL,
            difficulty             REAL,
            tags                   TEXT NOT NULL DEFAULT '',
            normalized_rmp_rating  REAL
        );
        CREATE INDEX IF NOT EXISTS idx_standardized_prof
            ON courses_standardized(professor_name);

        CREATE TABLE IF NOT EXISTS signal_table (
            table_name TEXT NOT NULL,
            status     TEXT NOT NULL,
            timestamp  TEXT NOT NULL
        );
        ",
    )?;
    Ok(())
}

// ── Course fragments ──

/// One processed document's worth of identity + rating data. Every string
/// field defaults to "Unknown" and every numeric to None, so all fragments
/// have identical shape regardless of how badly the source parsed.
#[derive(Debug, Clone)]
pub struct CourseFragment {
    pub filename: String,
    pub professor: String,
    pub semester: String,
    pub course_code: String,
    pub section: String,
    pub course_name: String,
    pub overall_rating: Option<f64>,
    pub rmp_id: Option<i64>,
}

pub fn upsert_fragments(conn: &Connection, fragments: &[CourseFragment]) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;
    let mut count = 0;
    {
        let mut stmt = tx.prepare(
            "INSERT OR REPLACE INTO course_fragments
             (filename, professor, semester, course_code, section, course_name,
              overall_rating, rmp_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )?;
        for f in fragments {
            count += stmt.execute(rusqlite::params![
                f.filename, f.professor, f.semester, f.course_code, f.section,
                f.course_name, f.overall_rating, f.rmp_id,
            ])?;
        }
    }
    tx.commit()?;
    Ok(count)
}

pub fn fetch_fragments(conn: &Connection, limit: Option<usize>) -> Result<Vec<CourseFragment>> {
    let sql = format!(
        "SELECT filename, professor, semester, course_code, section, course_name,
                overall_rating, rmp_id
         FROM course_fragments ORDER BY filename{}",
        match limit {
            Some(n) => format!(" LIMIT {}", n),
            None => String::new(),
        }
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], |row| {
            Ok(CourseFragment {
                filename: row.get(0)?,
                professor: row.get(1)?,
                semester: row.get(2)?,
                course_code: row.get(3)?,
                section: row.get(4)?,
                course_name: row.get(5)?,
                overall_rating: row.get(6)?,
                rmp_id: row.get(7)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ── Rating pages ──

/// Parsed fields from one professor's rating page, still raw strings.
/// Tags are a set on purpose: order is meaningless and duplicates collapse.
#[derive(Debug, Clone, Default)]
pub struct RatingFragment {
    pub overall_rating: Option<String>,
    pub would_take_again: Option<String>,
    pub difficulty: Option<String>,
    pub tags: BTreeSet<String>,
}

impl RatingFragment {
    pub fn tags_joined(&self) -> String {
        self.tags.iter().cloned().collect::<Vec<_>>().join(",")
    }
}

/// Outcome of one rating-page fetch. Error rows are kept so an id is never
/// fetched twice across runs.
#[derive(Debug)]
pub struct RatingPageRow {
    pub rmp_id: i64,
    pub status: Option<i32>,
    pub error: Option<String>,
    pub fragment: Option<RatingFragment>,
    pub latency_ms: Option<i64>,
}

pub const INSERT_RATING_PAGE_SQL: &str =
    "INSERT OR REPLACE INTO rating_pages
     (rmp_id, status, error, overall_rating, would_take_again, difficulty, tags, latency_ms)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)";

pub fn save_rating_page(stmt: &mut rusqlite::Statement, row: &RatingPageRow) -> Result<()> {
    let (overall, wta, difficulty, tags) = match &row.fragment {
        Some(f) => (
            f.overall_rating.clone(),
            f.would_take_again.clone(),
            f.difficulty.clone(),
            Some(serde_json::to_string(&f.tags)?),
        ),
        None => (None, None, None, None),
    };
    stmt.execute(rusqlite::params![
        row.rmp_id, row.status, row.error, overall, wta, difficulty, tags, row.latency_ms,
    ])?;
    Ok(())
}

/// Ids that already have a rating_pages row (success or error).
pub fn fetched_rating_ids(conn: &Connection) -> Result<HashSet<i64>> {
    let mut stmt = conn.prepare("SELECT rmp_id FROM rating_pages")?;
    let ids = stmt
        .query_map([], |row| row.get::<_, i64>(0))?
        .collect::<Result<HashSet<_>, _>>()?;
    Ok(ids)
}

/// Immutable id -> fragment mapping for the join; built once, read-only after.
pub fn fetch_rating_fragments(conn: &Connection) -> Result<HashMap<i64, RatingFragment>> {
    let mut stmt = conn.prepare(
        "SELECT rmp_id, overall_rating, would_take_again, difficulty, tags
         FROM rating_pages WHERE error IS NULL",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, Option<String>>(1)?,
            row.get::<_, Option<String>>(2)?,
            row.get::<_, Option<String>>(3)?,
            row.get::<_, Option<String>>(4)?,
        ))
    })?;

    let mut map = HashMap::new();
    for row in rows {
        let (rmp_id, overall_rating, would_take_again, difficulty, tags_json) = row?;
        let tags: BTreeSet<String> = match tags_json {
            Some(ref s) => serde_json::from_str(s).unwrap_or_default(),
            None => BTreeSet::new(),
        };
        map.insert(
            rmp_id,
            RatingFragment {
                overall_rating,
                would_take_again,
                difficulty,
                tags,
            },
        );
    }
    Ok(map)
}

// ── Enriched records ──

/// A course fragment joined with its rating page, ratings still raw strings.
#[derive(Debug, Clone)]
pub struct EnrichedRow {
    pub filename: String,
    pub professor: String,
    pub semester: String,
    pub course_code: String,
    pub section: String,
    pub course_name: String,
    pub overall_rating: Option<f64>,
    pub rmp_id: Option<i64>,
    pub scraped_overall_rating: Option<String>,
    pub would_take_again: Option<String>,
    pub difficulty: Option<String>,
    pub tags: Option<String>,
}

pub fn replace_enriched(conn: &Connection, rows: &[EnrichedRow]) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM enriched_courses", [])?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO enriched_courses
             (filename, professor, semester, course_code, section, course_name,
              overall_rating, rmp_id, scraped_overall_rating, would_take_again,
              difficulty, tags)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        )?;
        for r in rows {
            stmt.execute(rusqlite::params![
                r.filename, r.professor, r.semester, r.course_code, r.section,
                r.course_name, r.overall_rating, r.rmp_id, r.scraped_overall_rating,
                r.would_take_again, r.difficulty, r.tags,
            ])?;
        }
    }
    tx.commit()?;
    Ok(())
}

pub fn fetch_enriched(conn: &Connection) -> Result<Vec<EnrichedRow>> {
    let mut stmt = conn.prepare(
        "SELECT filename, professor, semester, course_code, section, course_name,
                overall_rating, rmp_id, scraped_overall_rating, would_take_again,
                difficulty, tags
         FROM enriched_courses ORDER BY id",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok(EnrichedRow {
                filename: row.get(0)?,
                professor: row.get(1)?,
                semester: row.get(2)?,
                course_code: row.get(3)?,
                section: row.get(4)?,
                course_name: row.get(5)?,
                overall_rating: row.get(6)?,
                rmp_id: row.get(7)?,
                scraped_overall_rating: row.get(8)?,
                would_take_again: row.get(9)?,
                difficulty: row.get(10)?,
                tags: row.get(11)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ── Canonical records ──

/// Final deduplicated, unit-normalized row. Field names are a contract with
/// downstream storage; the serde renames carry them into the CSV export
/// bit-for-bit.
#[derive(Debug, Clone, Serialize)]
pub struct CanonicalRecord {
    #[serde(rename = "FILENAME")]
    pub filename: String,
    #[serde(rename = "PROFESSOR_NAME")]
    pub professor_name: String,
    #[serde(rename = "FULL_PROFESSOR_NAME")]
    pub full_professor_name: String,
    #[serde(rename = "COURSE_CODE")]
    pub course_code: String,
    #[serde(rename = "COURSE_NAME")]
    pub course_name: String,
    #[serde(rename = "SEMESTER")]
    pub semester: String,
    #[serde(rename = "SECTION")]
    pub section: String,
    #[serde(rename = "RMP_ID")]
    pub rmp_id: Option<i64>,
    #[serde(rename = "OVERALL_RATING")]
    pub overall_rating: Option<f64>,
    #[serde(rename = "SCRAPED_OVERALL_RATING")]
    pub scraped_overall_rating: Option<f64>,
    #[serde(rename = "WOULD_TAKE_AGAIN")]
    pub would_take_again: Option<f64>,
    #[serde(rename = "DIFFICULTY")]
    pub difficulty: Option<f64>,
    #[serde(rename = "TAGS")]
    pub tags: String,
    #[serde(rename = "NORMALIZED_RMP_RATING")]
    pub normalized_rmp_rating: Option<f64>,
}

pub fn replace_standardized(conn: &Connection, rows: &[CanonicalRecord]) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM courses_standardized", [])?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO courses_standardized
             (filename, professor_name, full_professor_name, course_code, course_name,
              semester, section, rmp_id, overall_rating, scraped_overall_rating,
              would_take_again, difficulty, tags, normalized_rmp_rating)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        )?;
        for r in rows {
            stmt.execute(rusqlite::params![
                r.filename, r.professor_name, r.full_professor_name, r.course_code,
                r.course_name, r.semester, r.section, r.rmp_id, r.overall_rating,
                r.scraped_overall_rating, r.would_take_again, r.difficulty, r.tags,
                r.normalized_rmp_rating,
            ])?;
        }
    }
    tx.commit()?;
    Ok(())
}

pub fn fetch_standardized(
    conn: &Connection,
    professor: Option<&str>,
    semester: Option<&str>,
    limit: usize,
) -> Result<Vec<CanonicalRecord>> {
    let mut conditions = Vec::new();
    let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

    if let Some(p) = professor {
        conditions.push(format!("professor_name = ?{}", params.len() + 1));
        params.push(Box::new(p.to_string()));
    }
    if let Some(s) = semester {
        conditions.push(format!("semester = ?{}", params.len() + 1));
        params.push(Box::new(s.to_string()));
    }

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", conditions.join(" AND "))
    };

    let sql = format!(
        "SELECT filename, professor_name, full_professor_name, course_code,
                course_name, semester, section, rmp_id, overall_rating,
                scraped_overall_rating, would_take_again, difficulty, tags,
                normalized_rmp_rating
         FROM courses_standardized{}
         ORDER BY professor_name, course_code, semester, section
         LIMIT {}",
        where_clause, limit
    );

    let mut stmt = conn.prepare(&sql)?;
    let param_refs: Vec<&dyn rusqlite::types::ToSql> = params.iter().map(|p| p.as_ref()).collect();
    let rows = stmt
        .query_map(param_refs.as_slice(), |row| {
            Ok(CanonicalRecord {
                filename: row.get(0)?,
                professor_name: row.get(1)?,
                full_professor_name: row.get(2)?,
                course_code: row.get(3)?,
                course_name: row.get(4)?,
                semester: row.get(5)?,
                section: row.get(6)?,
                rmp_id: row.get(7)?,
                overall_rating: row.get(8)?,
                scraped_overall_rating: row.get(9)?,
                would_take_again: row.get(10)?,
                difficulty: row.get(11)?,
                tags: row.get(12)?,
                normalized_rmp_rating: row.get(13)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ── Signals ──

/// Success marker the downstream warehouse loader polls for.
pub fn insert_signal(conn: &Connection, table_name: &str, status: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO signal_table (table_name, status, timestamp) VALUES (?1, ?2, ?3)",
        rusqlite::params![table_name, status, chrono::Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

// ── Stats ──

pub struct Stats {
    pub fragments: usize,
    pub with_rmp_id: usize,
    pub pages_fetched: usize,
    pub fetch_errors: usize,
    pub enriched: usize,
    pub standardized: usize,
}

#[cfg(test)]
pub fn connect_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn get_stats(conn: &Connection) -> Result<Stats> {
    let fragments: usize =
        conn.query_row("SELECT COUNT(*) FROM course_fragments", [], |r| r.get(0))?;
    let with_rmp_id: usize = conn.query_row(
        "SELECT COUNT(*) FROM course_fragments WHERE rmp_id IS NOT NULL",
        [],
        |r| r.get(0),
    )?;
    let pages_fetched: usize =
        conn.query_row("SELECT COUNT(*) FROM rating_pages", [], |r| r.get(0))?;
    let fetch_errors: usize = conn.query_row(
        "SELECT COUNT(*) FROM rating_pages WHERE error IS NOT NULL",
        [],
        |r| r.get(0),
    )?;
    let enriched: usize =
        conn.query_row("SELECT COUNT(*) FROM enriched_courses", [], |r| r.get(0))?;
    let standardized: usize =
        conn.query_row("SELECT COUNT(*) FROM courses_standardized", [], |r| r.get(0))?;
    Ok(Stats {
        fragments,
        with_rmp_id,
        pages_fetched,
        fetch_errors,
        enriched,
        standardized,
    })
}

// ── Tests ──
