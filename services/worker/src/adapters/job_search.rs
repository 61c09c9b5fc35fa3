//! services/worker/src/adapters/job_search.rs
//!
//! Job discovery over the `job_postings` table, which an external scraper keeps
//! filled. Matching is plain case-insensitive substring search.

use async_trait::async_trait;
use auto_apply_core::domain::{Job, SearchCriteria};
use auto_apply_core::ports::{JobSearchService, PortResult};
use sqlx::{FromRow, PgPool};
use tracing::debug;

use super::db::db_error;

#[derive(Clone)]
pub struct PgJobSearchAdapter {
    pool: PgPool,
}

impl PgJobSearchAdapter {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(FromRow)]
struct PostingRecord {
    id: String,
    source: String,
    title: String,
    company: Option<String>,
    location: Option<String>,
    salary: Option<i64>,
    external_application: bool,
}
impl PostingRecord {
    fn to_domain(self) -> Job {
        Job {
            id: self.id,
            source: self.source,
            title: self.title,
            company: self.company,
            location: self.location,
            salary: self.salary,
            external_application: self.external_application,
        }
    }
}

/// `%term%` with LIKE metacharacters escaped.
fn like_pattern(term: &str) -> String {
    let mut pattern = String::with_capacity(term.len() + 2);
    pattern.push('%');
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

#[async_trait]
impl JobSearchService for PgJobSearchAdapter {
    async fn search(&self, criteria: &SearchCriteria) -> PortResult<Vec<Job>> {
        let keywords: Vec<String> = criteria.keywords.iter().map(|k| like_pattern(k)).collect();
        let locations: Vec<String> = criteria.locations.iter().map(|l| like_pattern(l)).collect();
        let limit = i64::try_from(criteria.limit).unwrap_or(i64::MAX);

        let records = sqlx::query_as::<_, PostingRecord>(
            "SELECT id, source, title, company, location, salary, external_application \
             FROM job_postings \
             WHERE (cardinality($1::text[]) = 0 OR title ILIKE ANY($1)) \
               AND (cardinality($2::text[]) = 0 OR location ILIKE ANY($2)) \
               AND ($3::bigint IS NULL OR salary IS NULL OR salary >= $3) \
             ORDER BY posted_at DESC \
             LIMIT $4",
        )
        .bind(&keywords)
        .bind(&locations)
        .bind(criteria.min_salary)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        debug!(found = records.len(), "Job postings search finished.");
        Ok(records.into_iter().map(PostingRecord::to_domain).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_like_pattern_wraps_term() {
        assert_eq!(like_pattern("rust"), "%rust%");
    }

    #[test]
    fn test_like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("100%_remote"), "%100\\%\\_remote%");
        assert_eq!(like_pattern("a\\b"), "%a\\\\b%");
    }
}
