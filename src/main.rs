mod db;
mod dedup;
mod extract;
mod merge;
mod normalize;
mod scrape;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Result;
use clap::{Parser, Subcommand};
use rusqlite::Connection;
use tracing::warn;

#[derive(Parser)]
#[command(name = "course_ratings", about = "Course evaluation / professor rating reconciliation pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract course fragments from staged PDF documents
    Process {
        /// Directory holding the staged .pdf files
        #[arg(long, default_value = "stage")]
        stage: PathBuf,
        /// Max documents to process (default: all)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Backfill ids, fetch rating pages, and build the enriched join
    Scrape {
        /// Auxiliary course_code -> rmp_id CSV for fallback id resolution
        #[arg(long, default_value = "stage/input.csv")]
        aux: PathBuf,
        /// Max professor ids to fetch
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Normalize units, resolve duplicates, and export the canonical table
    Standardize {
        /// Output CSV path
        #[arg(long, default_value = "courses_standardized.csv")]
        out: PathBuf,
    },
    /// Process + scrape + standardize in one pipeline
    Run {
        #[arg(long, default_value = "stage")]
        stage: PathBuf,
        #[arg(long, default_value = "stage/input.csv")]
        aux: PathBuf,
        /// Max professor ids to fetch
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        #[arg(long, default_value = "courses_standardized.csv")]
        out: PathBuf,
    },
    /// Show pipeline statistics
    Stats,
    /// Canonical courses overview table
    Overview {
        /// Filter by professor surname
        #[arg(short, long)]
        professor: Option<String>,
        /// Filter by semester (e.g. "SP 2025")
        #[arg(short, long)]
        semester: Option<String>,
        /// Max rows to display
        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Process { stage, limit } => {
            let conn = db::connect()?;
            db::init_schema(&conn)?;
            process_documents(&conn, &stage, limit)?;
            Ok(())
        }
        Commands::Scrape { aux, limit } => {
            let conn = db::connect()?;
            db::init_schema(&conn)?;
            scrape_and_enrich(&conn, &aux, limit).await?;
            Ok(())
        }
        Commands::Standardize { out } => {
            let conn = db::connect()?;
            db::init_schema(&conn)?;
            standardize_batch(&conn, &out)?;
            Ok(())
        }
        Commands::Run { stage, aux, limit, out } => {
            let conn = db::connect()?;
            db::init_schema(&conn)?;
            if process_documents(&conn, &stage, None)? == 0 {
                return Ok(());
            }
            if !scrape_and_enrich(&conn, &aux, limit).await? {
                return Ok(());
            }
            standardize_batch(&conn, &out)?;
            Ok(())
        }
        Commands::Stats => {
            let conn = db::connect()?;
            db::init_schema(&conn)?;
            let s = db::get_stats(&conn)?;
            println!("Fragments:    {}", s.fragments);
            println!("  with id:    {}", s.with_rmp_id);
            println!("Pages:        {}", s.pages_fetched);
            println!("  errors:     {}", s.fetch_errors);
            println!("Enriched:     {}", s.enriched);
            println!("Standardized: {}", s.standardized);
            Ok(())
        }
        Commands::Overview { professor, semester, limit } => {
            let conn = db::connect()?;
            db::init_schema(&conn)?;
            let rows = db::fetch_standardized(
                &conn,
                professor.as_deref(),
                semester.as_deref(),
                limit,
            )?;
            if rows.is_empty() {
                println!("No canonical courses found. Run 'standardize' first.");
                return Ok(());
            }

            println!(
                "{:>3} | {:<14} | {:<10} | {:<22} | {:<8} | {:>4} | {:>6} | {:>6} | {:>5} | {:>5}",
                "#", "Professor", "Course", "Name", "Semester", "Sec", "Rating", "RMP", "Norm", "WTA"
            );
            println!("{}", "-".repeat(110));

            for (i, r) in rows.iter().enumerate() {
                println!(
                    "{:>3} | {:<14} | {:<10} | {:<22} | {:<8} | {:>4} | {:>6} | {:>6} | {:>5} | {:>5}",
                    i + 1,
                    truncate(&r.professor_name, 14),
                    truncate(&r.course_code, 10),
                    truncate(&r.course_name, 22),
                    truncate(&r.semester, 8),
                    truncate(&r.section, 4),
                    fmt_opt(r.overall_rating),
                    fmt_opt(r.scraped_overall_rating),
                    fmt_opt(r.normalized_rmp_rating),
                    fmt_opt(r.would_take_again),
                );
            }

            let with_tags: Vec<_> = rows.iter().filter(|r| !r.tags.is_empty()).collect();
            if !with_tags.is_empty() {
                println!("\n--- Tags ---");
                for r in &with_tags {
                    println!("  {} ({}): {}", r.professor_name, r.course_code, r.tags);
                }
            }

            println!("\n{} canonical courses", rows.len());
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

/// Extract one CourseFragment per staged PDF. Documents are independent, so
/// extraction runs on the rayon pool in chunks; each chunk's partial results
/// are merged into the DB afterwards.
fn process_documents(conn: &Connection, stage: &Path, limit: Option<usize>) -> Result<usize> {
    use indicatif::{ProgressBar, ProgressStyle};
    use rayon::prelude::*;

    let mut files = list_staged_pdfs(stage)?;
    if let Some(n) = limit {
        files.truncate(n);
    }
    if files.is_empty() {
        println!("No PDF files found in {}", stage.display());
        return Ok(0);
    }
    println!("Processing {} documents...", files.len());

    let pb = ProgressBar::new(files.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})")?
            .progress_chars("#>-"),
    );

    let mut saved = 0;
    for chunk in files.chunks(64) {
        let fragments: Vec<_> = chunk
            .par_iter()
            .map(|(name, path)| {
                // An unreadable file is a document-level failure: extraction
                // still yields a fragment with body-derived fields defaulted.
                let bytes = std::fs::read(path).unwrap_or_else(|e| {
                    warn!("Could not read {}: {}", path.display(), e);
                    Vec::new()
                });
                extract::extract_course_info(&bytes, name)
            })
            .collect();
        saved += db::upsert_fragments(conn, &fragments)?;
        pb.inc(chunk.len() as u64);
    }

    pb.finish_and_clear();
    println!("Saved {} course fragments.", saved);
    Ok(saved)
}

fn list_staged_pdfs(stage: &Path) -> Result<Vec<(String, PathBuf)>> {
    let entries = match std::fs::read_dir(stage) {
        Ok(e) => e,
        Err(e) => {
            warn!("Stage directory {} unavailable: {}", stage.display(), e);
            return Ok(Vec::new());
        }
    };

    let mut files: Vec<(String, PathBuf)> = entries
        .filter_map(|entry| {
            let entry = entry.ok()?;
            let path = entry.path();
            let name = path.file_name()?.to_str()?.to_string();
            if name.to_lowercase().ends_with(".pdf") {
                Some((name, path))
            } else {
                None
            }
        })
        .collect();
    files.sort();
    Ok(files)
}

/// Backfill external ids from the auxiliary table, fetch each distinct id's
/// rating page (skipping ids fetched on earlier runs), and materialize the
/// enriched join. Returns false on an empty-batch outcome.
async fn scrape_and_enrich(conn: &Connection, aux: &Path, limit: Option<usize>) -> Result<bool> {
    let fragments = db::fetch_fragments(conn, None)?;
    if fragments.is_empty() {
        println!("No course fragments. Run 'process' first.");
        return Ok(false);
    }

    let aux_table = merge::load_aux_table(aux);
    let merged = merge::backfill_ids(fragments, &aux_table);

    let ids: BTreeSet<i64> = merged.iter().filter_map(|f| f.rmp_id).collect();
    if ids.is_empty() {
        println!("No RMP ids resolved after merging.");
        return Ok(false);
    }
    println!("Found {} unique professors with RMP ids", ids.len());

    let already = db::fetched_rating_ids(conn)?;
    let mut to_fetch: Vec<i64> = ids.iter().copied().filter(|id| !already.contains(id)).collect();
    if let Some(n) = limit {
        to_fetch.truncate(n);
    }

    if to_fetch.is_empty() {
        println!("All rating pages already fetched.");
    } else {
        println!("Fetching {} rating pages...", to_fetch.len());
        let stats = scrape::fetch_rating_pages(conn, &to_fetch).await?;
        println!(
            "Done: {} fetched ({} ok, {} errors).",
            stats.total, stats.ok, stats.errors
        );
    }

    // Built once, read-only for the join.
    let ratings = db::fetch_rating_fragments(conn)?;
    let enriched: Vec<db::EnrichedRow> = merged
        .into_iter()
        .map(|f| {
            let rating = f.rmp_id.and_then(|id| ratings.get(&id));
            db::EnrichedRow {
                filename: f.filename,
                professor: f.professor,
                semester: f.semester,
                course_code: f.course_code,
                section: f.section,
                course_name: f.course_name,
                overall_rating: f.overall_rating,
                rmp_id: f.rmp_id,
                scraped_overall_rating: rating.and_then(|r| r.overall_rating.clone()),
                would_take_again: rating.and_then(|r| r.would_take_again.clone()),
                difficulty: rating.and_then(|r| r.difficulty.clone()),
                tags: rating.map(|r| r.tags_joined()),
            }
        })
        .collect();

    db::replace_enriched(conn, &enriched)?;
    println!("Saved {} enriched records.", enriched.len());
    Ok(true)
}

/// Global reduction over the whole batch: every enriched record must be
/// materialized before duplicate groups can be formed.
fn standardize_batch(conn: &Connection, out: &Path) -> Result<()> {
    let rows = db::fetch_enriched(conn)?;
    if rows.is_empty() {
        println!("No enriched records. Run 'scrape' first.");
        return Ok(());
    }

    let before = rows.len();
    let canonical = dedup::standardize(&rows);
    db::replace_standardized(conn, &canonical)?;

    let mut writer = csv::Writer::from_path(out)?;
    for record in &canonical {
        writer.serialize(record)?;
    }
    writer.flush()?;

    db::insert_signal(conn, "COURSES_STANDARDIZED", "success")?;
    println!(
        "Standardized {} canonical rows ({} duplicates removed). Exported to {}",
        canonical.len(),
        before - canonical.len(),
        out.display()
    );
    Ok(())
}

fn fmt_opt(v: Option<f64>) -> String {
    v.map(|v| format!("{:.2}", v)).unwrap_or_else(|| "-".into())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    const RATING_PAGE: &str = r#"
        <html><body>
          <div class="RatingValue__Numerator-qw8sqy-2 duhvlP">3.9</div>
          <div class="FeedbackItem__FeedbackNumber-uof32n-1 kkESWs">75%</div>
          <div class="FeedbackItem__FeedbackNumber-uof32n-1 kkESWs">2.1</div>
          <span class="Tag-bs9vf4-0 bmtbjB">Helpful</span>
        </body></html>"#;

    #[test]
    fn reconciliation_end_to_end() {
        // Document side: filename convention + body text
        let filename = "$$Jane Doe$$.SP2025.L24.CS101.5.RMP7777.pdf";
        let fields = extract::filename::parse_filename(filename);
        let (course_name, overall_rating) = extract::text::parse_body(
            "Reports for SP2025 - Intro to Programming (CS101) Overall Rating: 4.50",
        );
        let fragment = db::CourseFragment {
            filename: filename.to_string(),
            professor: fields.professor,
            semester: fields.semester,
            course_code: fields.course_code,
            section: fields.section,
            course_name,
            overall_rating,
            rmp_id: fields.rmp_id,
        };
        assert_eq!(fragment.rmp_id, Some(7777));

        // No auxiliary table: the extracted id passes through unchanged
        let merged = merge::backfill_ids(vec![fragment], &merge::AuxTable::default());
        assert_eq!(merged.len(), 1);

        // Rating-page side
        let rating = extract::rating_page::parse_rating_page(RATING_PAGE);
        let f = &merged[0];
        let enriched = db::EnrichedRow {
            filename: f.filename.clone(),
            professor: f.professor.clone(),
            semester: f.semester.clone(),
            course_code: f.course_code.clone(),
            section: f.section.clone(),
            course_name: f.course_name.clone(),
            overall_rating: f.overall_rating,
            rmp_id: f.rmp_id,
            scraped_overall_rating: rating.overall_rating.clone(),
            would_take_again: rating.would_take_again.clone(),
            difficulty: rating.difficulty.clone(),
            tags: Some(rating.tags_joined()),
        };

        let canonical = dedup::standardize(&[enriched]);
        assert_eq!(canonical.len(), 1);
        let r = &canonical[0];
        assert_eq!(r.professor_name, "Doe");
        assert_eq!(r.full_professor_name, "Jane Doe");
        assert_eq!(r.course_code, "CS101");
        assert_eq!(r.course_name, "Intro to Programming");
        assert_eq!(r.section, "5");
        assert_eq!(r.overall_rating, Some(4.5));
        assert_eq!(r.scraped_overall_rating, Some(3.9));
        assert_eq!(r.normalized_rmp_rating, Some(5.35));
        assert_eq!(r.would_take_again, Some(0.75));
        assert_eq!(r.difficulty, Some(2.1));
        assert_eq!(r.tags, "helpful");
    }

    #[test]
    fn standardize_batch_writes_canonical_table_and_signal() {
        let conn = db::connect_in_memory().unwrap();
        db::replace_enriched(
            &conn,
            &[db::EnrichedRow {
                filename: "a.pdf".to_string(),
                professor: "Jane Doe".to_string(),
                semester: "SP 2025".to_string(),
                course_code: "CS101".to_string(),
                section: "1".to_string(),
                course_name: "Intro".to_string(),
                overall_rating: Some(4.5),
                rmp_id: Some(7777),
                scraped_overall_rating: Some("3.9".to_string()),
                would_take_again: Some("82".to_string()),
                difficulty: Some("2.1".to_string()),
                tags: Some("helpful".to_string()),
            }],
        )
        .unwrap();

        let out = std::env::temp_dir().join("course_ratings_test_export.csv");
        standardize_batch(&conn, &out).unwrap();

        let rows = db::fetch_standardized(&conn, None, None, 50).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].would_take_again, Some(0.82));

        let exported = std::fs::read_to_string(&out).unwrap();
        let header = exported.lines().next().unwrap();
        assert_eq!(
            header,
            "FILENAME,PROFESSOR_NAME,FULL_PROFESSOR_NAME,COURSE_CODE,COURSE_NAME,\
             SEMESTER,SECTION,RMP_ID,OVERALL_RATING,SCRAPED_OVERALL_RATING,\
             WOULD_TAKE_AGAIN,DIFFICULTY,TAGS,NORMALIZED_RMP_RATING"
        );
        std::fs::remove_file(&out).ok();
    }
}
