use crate::data::{DataClient, Location};
use crate::error::Error;
use crate::journey_cache::tiploc_key;

use sqlx::FromRow;

#[derive(FromRow)]
struct NameMatchRow {
    stanox: Option<String>,
    description: Option<String>,
    tps_description: Option<String>,
}

// Picks the row whose matched description is closest in length to the query;
// the first row encountered wins a tie. Rows without a STANOX or without any
// description never match.
fn closest_description_match(rows: Vec<NameMatchRow>, name: &str) -> Option<String> {
    let mut best: Option<(String, usize)> = None;

    for row in rows {
        let stanox = match row.stanox {
            Some(x) if !x.is_empty() => x,
            _ => continue,
        };

        let description = match (
            row.description.filter(|x| !x.is_empty()),
            row.tps_description.filter(|x| !x.is_empty()),
        ) {
            (Some(x), _) => x,
            (None, Some(x)) => x,
            (None, None) => continue,
        };

        let length_diff = description.len().abs_diff(name.len());
        if best.as_ref().map_or(true, |(_, d)| length_diff < *d) {
            best = Some((stanox, length_diff));
        }
    }

    best.map(|(stanox, _)| stanox)
}

impl DataClient {
    // Exact TIPLOC lookup, cached under tiploc:<code>. The TTL differs by
    // caller: query enrichment keeps entries for a day, the VSTP intake for
    // a week.
    pub async fn stanox_by_tiploc(&self, tiploc: &str, ttl: u64) -> Result<String, Error> {
        let key = tiploc_key(tiploc);
        if let Ok(Some(cached)) = self.cache.get(&key).await {
            if !cached.is_empty() {
                return Ok(cached);
            }
        }

        let (stanox,): (Option<String>,) =
            sqlx::query_as("SELECT stanox FROM tiploc WHERE tiploc_code = $1")
                .bind(tiploc)
                .fetch_one(&self.pool)
                .await
                .map_err(Error::from_query)?;

        let stanox = match stanox {
            Some(x) if !x.is_empty() => x,
            _ => return Err(Error::NotFound),
        };

        let _ = self.cache.set(&key, &stanox, ttl).await;

        Ok(stanox)
    }

    pub async fn stanox_by_crs(&self, crs_code: &str) -> Result<String, Error> {
        let (stanox,): (Option<String>,) =
            sqlx::query_as("SELECT stanox FROM tiploc WHERE crs_code = $1 LIMIT 1")
                .bind(crs_code)
                .fetch_one(&self.pool)
                .await
                .map_err(Error::from_query)?;

        stanox.filter(|x| !x.is_empty()).ok_or(Error::NotFound)
    }

    pub async fn stanox_by_location_name(&self, name: &str) -> Result<String, Error> {
        let rows: Vec<NameMatchRow> = sqlx::query_as(
            "
            SELECT stanox, description, tps_description
            FROM tiploc
            WHERE description ILIKE $1 OR tps_description ILIKE $1
            ",
        )
        .bind(format!("%{}%", name))
        .fetch_all(&self.pool)
        .await?;

        closest_description_match(rows, name).ok_or(Error::NotFound)
    }

    // Collates every TIPLOC row sharing the STANOX into one location.
    pub async fn location_details(&self, stanox: &str) -> Result<Location, Error> {
        let rows: Vec<(Option<String>, Option<String>, Option<String>)> = sqlx::query_as(
            "
            SELECT description, crs_code, tiploc_code
            FROM tiploc
            WHERE stanox = $1
            ORDER BY tiploc_code
            ",
        )
        .bind(stanox)
        .fetch_all(&self.pool)
        .await?;

        let mut details = Location {
            stanox: stanox.to_string(),
            ..Default::default()
        };

        for (description, crs_code, tiploc_code) in rows {
            if details.full_name.is_none() {
                if let Some(x) = description.filter(|x| !x.is_empty()) {
                    details.full_name = Some(x);
                }
            }
            if details.crs.is_none() {
                if let Some(x) = crs_code.filter(|x| !x.is_empty()) {
                    details.crs = Some(x);
                }
            }
            if let Some(x) = tiploc_code.filter(|x| !x.is_empty()) {
                details.tiploc_codes.push(x);
            }
        }

        if details.full_name.is_none() && details.tiploc_codes.is_empty() {
            return Err(Error::NotFound);
        }

        Ok(details)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(stanox: &str, description: &str, tps: &str) -> NameMatchRow {
        let opt = |s: &str| {
            if s.is_empty() {
                None
            } else {
                Some(s.to_string())
            }
        };
        NameMatchRow {
            stanox: opt(stanox),
            description: opt(description),
            tps_description: opt(tps),
        }
    }

    #[test]
    fn closest_length_wins() {
        let rows = vec![
            row("04303", "EDINBURGH WAVERLEY", ""),
            row("04302", "EDINBURGH", ""),
        ];
        assert_eq!(closest_description_match(rows, "Edinburg"), Some("04302".to_string()));
    }

    #[test]
    fn first_row_wins_ties() {
        let rows = vec![row("1", "ABERDEEN", ""), row("2", "ABERDOUR", "")];
        assert_eq!(closest_description_match(rows, "ABER"), Some("1".to_string()));
    }

    #[test]
    fn tps_description_is_a_fallback() {
        let rows = vec![row("9", "", "PENZANCE")];
        assert_eq!(closest_description_match(rows, "PENZANCE"), Some("9".to_string()));
    }

    #[test]
    fn rows_without_stanox_are_skipped() {
        let rows = vec![row("", "YORK", ""), row("", "", "")];
        assert_eq!(closest_description_match(rows, "YORK"), None);
    }
}
