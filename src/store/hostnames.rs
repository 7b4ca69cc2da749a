//! Insert-or-ignore writes against the `hostnames` table (§3, §4.B, §4.G).

use sqlx::SqlitePool;

/// Insert one (device, ip, hostname) row if the composite key doesn't
/// already exist. Existing rows are left untouched — the first-seen
/// `updated_ts` is preserved, and re-ingesting the same triple never changes
/// row count (§8).
pub async fn insert_or_ignore(
    pool: &SqlitePool,
    device_mac_address: &str,
    ip_address: &str,
    hostname: &str,
    data_source: &str,
    now: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"INSERT OR IGNORE INTO hostnames
           (device_mac_address, ip_address, hostname, data_source, updated_ts, metadata_json)
           VALUES (?1, ?2, ?3, ?4, ?5, '{}')"#,
    )
    .bind(device_mac_address)
    .bind(ip_address)
    .bind(hostname)
    .bind(data_source)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(())
}

/// Look up the most recently updated hostname recorded for an IP address,
/// used by the flow backfill to fill `src_hostname`/`dest_hostname`.
pub async fn hostname_for_ip(pool: &SqlitePool, ip: &str) -> Result<Option<String>, sqlx::Error> {
    sqlx::query_scalar(
        r#"SELECT hostname FROM hostnames WHERE ip_address = ?1 ORDER BY updated_ts DESC LIMIT 1"#,
    )
    .bind(ip)
    .fetch_optional(pool)
    .await
}
