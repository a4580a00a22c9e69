use std::time::{Duration, Instant};

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_LANGUAGE, REFERER, USER_AGENT};
use rusqlite::Connection;
use tracing::{info, warn};

use crate::db::{self, RatingPageRow};
use crate::extract::rating_page;

const PROFESSOR_URL: &str = "https://www.ratemyprofessors.com/professor/";
const BROWSER_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
                          AppleWebKit/537.36 (KHTML, like Gecko) \
                          Chrome/91.0.4472.124 Safari/537.36";
// Politeness window between requests; the site throttles aggressively.
const MIN_DELAY_MS: u64 = 1000;
const MAX_DELAY_MS: u64 = 3000;

pub struct FetchStats {
    pub total: usize,
    pub ok: usize,
    pub errors: usize,
}

/// Fetch and parse one rating page per id, saving each result to DB as it
/// arrives. Requests run sequentially with a randomized delay; a failed
/// fetch yields an error row, never an aborted batch.
pub async fn fetch_rating_pages(conn: &Connection, ids: &[i64]) -> Result<FetchStats> {
    let client = build_client()?;
    let total = ids.len();

    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
            .progress_chars("=> "),
    );

    let mut insert_stmt = conn.prepare(db::INSERT_RATING_PAGE_SQL)?;

    let mut ok = 0usize;
    let mut errors = 0usize;

    for (i, &rmp_id) in ids.iter().enumerate() {
        let row = fetch_one(&client, rmp_id).await;
        if row.error.is_some() {
            errors += 1;
        } else {
            ok += 1;
        }
        db::save_rating_page(&mut insert_stmt, &row)?;
        pb.inc(1);

        if i + 1 < total {
            let delay = rand::thread_rng().gen_range(MIN_DELAY_MS..=MAX_DELAY_MS);
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
    }

    pb.finish_and_clear();
    info!("Fetched {} rating pages ({} ok, {} errors)", total, ok, errors);

    Ok(FetchStats { total, ok, errors })
}

fn build_client() -> Result<reqwest::Client> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_UA));
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
    headers.insert(
        REFERER,
        HeaderValue::from_static("https://www.ratemyprofessors.com/"),
    );
    let client = reqwest::Client::builder()
        .default_headers(headers)
        .timeout(Duration::from_secs(30))
        .build()?;
    Ok(client)
}

/// Any transport or non-200 outcome is recorded as an error row; the id is
/// simply absent from the downstream join.
async fn fetch_one(client: &reqwest::Client, rmp_id: i64) -> RatingPageRow {
    let url = format!("{}{}", PROFESSOR_URL, rmp_id);
    let start = Instant::now();

    let response = match client.get(&url).send().await {
        Ok(r) => r,
        Err(e) => {
            warn!("Request failed for professor {}: {}", rmp_id, e);
            return error_row(rmp_id, None, e.to_string(), start);
        }
    };

    let status = response.status();
    if status != reqwest::StatusCode::OK {
        warn!("Professor {} returned HTTP {}", rmp_id, status.as_u16());
        return error_row(
            rmp_id,
            Some(status.as_u16() as i32),
            format!("HTTP {}", status.as_u16()),
            start,
        );
    }

    let body = match response.text().await {
        Ok(b) => b,
        Err(e) => {
            warn!("Could not read body for professor {}: {}", rmp_id, e);
            return error_row(rmp_id, Some(200), e.to_string(), start);
        }
    };

    let fragment = rating_page::parse_rating_page(&body);
    RatingPageRow {
        rmp_id,
        status: Some(200),
        error: None,
        fragment: Some(fragment),
        latency_ms: Some(start.elapsed().as_millis() as i64),
    }
}

fn error_row(rmp_id: i64, status: Option<i32>, error: String, start: Instant) -> RatingPageRow {
    RatingPageRow {
        rmp_id,
        status,
        error: Some(error),
        fragment: None,
        latency_ms: Some(start.elapsed().as_millis() as i64),
    }
}
