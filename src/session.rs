//! Anti-bot session token storage and cookie-header construction.
//!
//! The token itself is harvested out of band by a browser-automation
//! collaborator and submitted through the ops API; fetchers only ever read it.

use sqlx::SqlitePool;

use crate::config::{COOKIE_WHITELIST, SENTINEL_COOKIE};
use crate::error::Result;
use crate::types::RequestClass;

/// Current session cookie string, empty if no refresh has happened yet.
/// An empty token is not an error — the request goes out degraded and the
/// retry loop deals with the fallout.
pub async fn current_token(pool: &SqlitePool) -> Result<String> {
    let row: Option<(String,)> =
        sqlx::query_as("SELECT cookie FROM sessions ORDER BY id LIMIT 1")
            .fetch_optional(pool)
            .await?;
    Ok(row.map(|r| r.0).unwrap_or_default())
}

/// Overwrite the single session row in place, creating it on first refresh.
pub async fn store_token(pool: &SqlitePool, cookie: &str) -> Result<()> {
    let updated_at = chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
    let result = sqlx::query("UPDATE sessions SET cookie = ?, updated_at = ?")
        .bind(cookie)
        .bind(&updated_at)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        sqlx::query("INSERT INTO sessions (cookie, updated_at) VALUES (?, ?)")
            .bind(cookie)
            .bind(&updated_at)
            .execute(pool)
            .await?;
    }
    Ok(())
}

/// Build the request cookie header from the raw session token.
///
/// Keeps only whitelisted cookie names, re-joins them and appends the
/// `AKA_A2=A;` sentinel. The broad-market indices endpoint rejects requests
/// carrying `nsit`/`nseappid`, so those are stripped for that class after
/// whitelist filtering. Idempotent: the sentinel is not whitelisted, so
/// re-filtering drops and re-appends it.
pub fn filter_cookie_header(raw: &str, class: RequestClass) -> String {
    let mut header = String::with_capacity(raw.len());
    for segment in raw.split(';') {
        let segment = segment.trim();
        if COOKIE_WHITELIST.iter().any(|prefix| segment.starts_with(prefix)) {
            header.push_str(segment);
            header.push(';');
        }
    }

    if class == RequestClass::BroadMarket {
        header = strip_cookie(&header, "nsit");
        header = strip_cookie(&header, "nseappid");
    }

    // Broad-market requests always carry the sentinel, even with no session;
    // other classes send an empty header when nothing was kept.
    if class == RequestClass::BroadMarket || !header.is_empty() {
        header.push_str(SENTINEL_COOKIE);
    }

    header
}

/// Remove every `name=...;` occurrence from a `;`-terminated cookie string.
fn strip_cookie(header: &str, name: &str) -> String {
    let pattern = format!("{name}=");
    let mut out = String::with_capacity(header.len());
    let mut rest = header;
    while let Some(pos) = rest.find(&pattern) {
        out.push_str(&rest[..pos]);
        rest = match rest[pos..].find(';') {
            Some(end) => &rest[pos + end + 1..],
            None => "",
        };
    }
    out.push_str(rest);
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const RAW: &str = "_abck=abc123; bm_sz=xyz; sessionid=drop-me; nsit=tok1; nseappid=tok2; ak_bmsc=keep";

    #[test]
    fn whitelist_keeps_known_cookies_and_appends_sentinel() {
        let header = filter_cookie_header(RAW, RequestClass::IndexOptions);
        assert_eq!(
            header,
            "_abck=abc123;bm_sz=xyz;nsit=tok1;nseappid=tok2;ak_bmsc=keep;AKA_A2=A;"
        );
    }

    #[test]
    fn unknown_cookies_are_dropped() {
        let header = filter_cookie_header(RAW, RequestClass::Equities);
        assert!(!header.contains("sessionid"));
    }

    #[test]
    fn broad_market_strips_nsit_and_nseappid() {
        let header = filter_cookie_header(RAW, RequestClass::BroadMarket);
        assert!(!header.contains("nsit="));
        assert!(!header.contains("nseappid="));
        assert_eq!(header, "_abck=abc123;bm_sz=xyz;ak_bmsc=keep;AKA_A2=A;");
    }

    #[test]
    fn empty_token_broad_market_is_sentinel_alone() {
        assert_eq!(filter_cookie_header("", RequestClass::BroadMarket), "AKA_A2=A;");
    }

    #[test]
    fn empty_token_other_classes_is_empty_header() {
        assert_eq!(filter_cookie_header("", RequestClass::IndexOptions), "");
        assert_eq!(filter_cookie_header("", RequestClass::Equities), "");
    }

    #[test]
    fn filter_is_idempotent() {
        for class in [
            RequestClass::IndexOptions,
            RequestClass::BroadMarket,
            RequestClass::Equities,
        ] {
            let once = filter_cookie_header(RAW, class);
            let twice = filter_cookie_header(&once, class);
            assert_eq!(once, twice, "class {class:?}");
        }
    }

    #[tokio::test]
    async fn store_token_overwrites_single_row() {
        // Single connection: each new connection to :memory: would otherwise
        // see its own empty database.
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();

        assert_eq!(current_token(&pool).await.unwrap(), "");

        store_token(&pool, "nsit=a;").await.unwrap();
        assert_eq!(current_token(&pool).await.unwrap(), "nsit=a;");

        store_token(&pool, "nsit=b;").await.unwrap();
        assert_eq!(current_token(&pool).await.unwrap(), "nsit=b;");

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM sessions")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }
}
