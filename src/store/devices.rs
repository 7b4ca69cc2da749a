//! Upserts and queries against the `devices` table (§3, §4.B, §4.G-ARP/DHCP).

use sqlx::SqlitePool;

use crate::oui::OuiDatabase;

/// ARP-learn upsert. `is_gateway` is combined with any existing value via
/// `MAX` so that once set to 1 it is never cleared by a later sighting
/// (§3 monotonicity invariant). `is_inspected` and `metadata_json` are seeded
/// only on first insert and otherwise left untouched.
pub async fn upsert_from_arp(
    pool: &SqlitePool,
    mac: &str,
    ip: &str,
    is_gateway: bool,
    inspect_by_default: bool,
    now: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"INSERT INTO devices (mac_address, ip_address, is_inspected, is_gateway, updated_ts, metadata_json)
           VALUES (?1, ?2, ?3, ?4, ?5, '{}')
           ON CONFLICT(mac_address) DO UPDATE SET
               ip_address = excluded.ip_address,
               updated_ts = excluded.updated_ts,
               is_gateway = MAX(devices.is_gateway, excluded.is_gateway)"#,
    )
    .bind(mac)
    .bind(ip)
    .bind(inspect_by_default)
    .bind(is_gateway)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(())
}

/// DHCP upsert: `ip_address` overwrites, `metadata_json.dhcp_hostname` is
/// shallow-merged in (new key wins), `is_gateway`/`is_inspected` untouched on
/// conflict, seeded to false/default on first insert.
pub async fn upsert_from_dhcp(
    pool: &SqlitePool,
    mac: &str,
    ip: &str,
    hostname: &str,
    inspect_by_default: bool,
    now: i64,
) -> Result<(), sqlx::Error> {
    let patch = serde_json::json!({ "dhcp_hostname": hostname }).to_string();

    sqlx::query(
        r#"INSERT INTO devices (mac_address, ip_address, is_inspected, is_gateway, updated_ts, metadata_json)
           VALUES (?1, ?2, ?3, 0, ?4, json_object('dhcp_hostname', ?5))
           ON CONFLICT(mac_address) DO UPDATE SET
               ip_address = excluded.ip_address,
               updated_ts = excluded.updated_ts,
               metadata_json = json_patch(devices.metadata_json, ?6)"#,
    )
    .bind(mac)
    .bind(ip)
    .bind(inspect_by_default)
    .bind(now)
    .bind(hostname)
    .bind(&patch)
    .execute(pool)
    .await?;

    Ok(())
}

/// Patch `metadata_json.oui_vendor` onto any device row that lacks it,
/// computing the vendor in application code (no live SQL scalar function —
/// see DESIGN.md). Called after every ARP learn.
pub async fn backfill_oui_vendor(pool: &SqlitePool, oui: &OuiDatabase) -> Result<(), sqlx::Error> {
    let rows: Vec<(String,)> = sqlx::query_as(
        r#"SELECT mac_address FROM devices WHERE json_extract(metadata_json, '$.oui_vendor') IS NULL"#,
    )
    .fetch_all(pool)
    .await?;

    for (mac,) in rows {
        let Some(vendor) = oui.lookup(&mac) else {
            continue;
        };
        let patch = serde_json::json!({ "oui_vendor": vendor }).to_string();
        sqlx::query(
            r#"UPDATE devices SET metadata_json = json_patch(metadata_json, ?1) WHERE mac_address = ?2"#,
        )
        .bind(&patch)
        .bind(&mac)
        .execute(pool)
        .await?;
    }

    Ok(())
}

/// Merge an enrichment key (e.g. `mdns_json`, `ssdp_json`) into a device's
/// metadata, but only if that key is currently absent — first-write-wins
/// (§6 mDNS/SSDP contract).
pub async fn patch_metadata_if_absent(
    pool: &SqlitePool,
    mac: &str,
    key: &str,
    value: &serde_json::Value,
) -> Result<(), sqlx::Error> {
    let patch = serde_json::json!({ key: value }).to_string();
    let path = format!("$.{key}");
    sqlx::query(
        r#"UPDATE devices SET metadata_json = json_patch(metadata_json, ?1)
           WHERE mac_address = ?2 AND json_extract(metadata_json, ?3) IS NULL"#,
    )
    .bind(&patch)
    .bind(mac)
    .bind(&path)
    .execute(pool)
    .await?;
    Ok(())
}

/// Look up a device's MAC address by its currently known IP — used by the
/// flow aggregator to rewrite the host-MAC side of a flow to the real peer.
pub async fn mac_by_ip(pool: &SqlitePool, ip: &str) -> Result<Option<String>, sqlx::Error> {
    sqlx::query_scalar(r#"SELECT mac_address FROM devices WHERE ip_address = ?1 LIMIT 1"#)
        .bind(ip)
        .fetch_optional(pool)
        .await
}

/// Look up a device's current IP address by MAC.
pub async fn ip_by_mac(pool: &SqlitePool, mac: &str) -> Result<Option<String>, sqlx::Error> {
    sqlx::query_scalar(r#"SELECT ip_address FROM devices WHERE mac_address = ?1 LIMIT 1"#)
        .bind(mac)
        .fetch_optional(pool)
        .await
}

/// Resolve the gateway's MAC address, if learned yet.
pub async fn gateway_mac(pool: &SqlitePool) -> Result<Option<String>, sqlx::Error> {
    sqlx::query_scalar(r#"SELECT mac_address FROM devices WHERE is_gateway = 1 LIMIT 1"#)
        .fetch_optional(pool)
        .await
}

/// A device eligible to be spoofed (§4.H step 2).
pub struct Victim {
    pub mac_address: String,
    pub ip_address: String,
}

/// `is_inspected=1 AND ip_address != '' AND mac_address != '' AND is_gateway = 0`,
/// further excluding the gateway/host IPs and the host MAC at the call site
/// is left to the caller since those are global-state values, not store
/// state (§4.H step 2).
pub async fn inspected_victims(pool: &SqlitePool) -> Result<Vec<Victim>, sqlx::Error> {
    sqlx::query_as(
        r#"SELECT mac_address, ip_address FROM devices
           WHERE is_inspected = 1 AND ip_address != '' AND mac_address != '' AND is_gateway = 0"#,
    )
    .fetch_all(pool)
    .await
    .map(|rows: Vec<(String, String)>| {
        rows.into_iter()
            .map(|(mac_address, ip_address)| Victim {
                mac_address,
                ip_address,
            })
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store;

    #[tokio::test]
    async fn test_arp_upsert_inserts_device() {
        let pool = store::init("sqlite::memory:").await.unwrap();
        upsert_from_arp(&pool, "aa:bb:cc:11:22:33", "192.168.1.50", false, true, 1000)
            .await
            .unwrap();

        let row: (String, bool, bool) = sqlx::query_as(
            "SELECT ip_address, is_inspected, is_gateway FROM devices WHERE mac_address = ?1",
        )
        .bind("aa:bb:cc:11:22:33")
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(row.0, "192.168.1.50");
        assert!(row.1);
        assert!(!row.2);
    }

    #[tokio::test]
    async fn test_is_gateway_is_monotone() {
        let pool = store::init("sqlite::memory:").await.unwrap();
        upsert_from_arp(&pool, "aa:bb:cc:11:22:33", "192.168.1.1", true, false, 1000)
            .await
            .unwrap();
        // A later sighting with is_gateway=false must not clear it.
        upsert_from_arp(&pool, "aa:bb:cc:11:22:33", "192.168.1.1", false, false, 2000)
            .await
            .unwrap();

        let is_gateway: bool =
            sqlx::query_scalar("SELECT is_gateway FROM devices WHERE mac_address = ?1")
                .bind("aa:bb:cc:11:22:33")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert!(is_gateway, "is_gateway must stay true once set");
    }

    #[tokio::test]
    async fn test_repeated_arp_learn_single_row_updates_ts() {
        let pool = store::init("sqlite::memory:").await.unwrap();
        upsert_from_arp(&pool, "aa:bb:cc:11:22:33", "192.168.1.50", false, true, 1000)
            .await
            .unwrap();
        upsert_from_arp(&pool, "aa:bb:cc:11:22:33", "192.168.1.50", false, true, 2000)
            .await
            .unwrap();

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM devices")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count.0, 1);

        let updated_ts: i64 =
            sqlx::query_scalar("SELECT updated_ts FROM devices WHERE mac_address = ?1")
                .bind("aa:bb:cc:11:22:33")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(updated_ts, 2000);
    }

    #[tokio::test]
    async fn test_arp_upsert_preserves_is_inspected_on_conflict() {
        let pool = store::init("sqlite::memory:").await.unwrap();
        upsert_from_arp(&pool, "aa:bb:cc:11:22:33", "192.168.1.50", false, true, 1000)
            .await
            .unwrap();
        sqlx::query("UPDATE devices SET is_inspected = 0 WHERE mac_address = ?1")
            .bind("aa:bb:cc:11:22:33")
            .execute(&pool)
            .await
            .unwrap();

        // A later ARP learn (even with a different default-inspect seed)
        // must not flip is_inspected back on.
        upsert_from_arp(&pool, "aa:bb:cc:11:22:33", "192.168.1.50", false, true, 2000)
            .await
            .unwrap();

        let is_inspected: bool =
            sqlx::query_scalar("SELECT is_inspected FROM devices WHERE mac_address = ?1")
                .bind("aa:bb:cc:11:22:33")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert!(!is_inspected);
    }

    #[tokio::test]
    async fn test_dhcp_upsert_merges_hostname() {
        let pool = store::init("sqlite::memory:").await.unwrap();
        upsert_from_dhcp(&pool, "aa:11:22:33:44:55", "192.168.1.60", "printer", false, 1000)
            .await
            .unwrap();

        let metadata: String =
            sqlx::query_scalar("SELECT metadata_json FROM devices WHERE mac_address = ?1")
                .bind("aa:11:22:33:44:55")
                .fetch_one(&pool)
                .await
                .unwrap();
        let value: serde_json::Value = serde_json::from_str(&metadata).unwrap();
        assert_eq!(value["dhcp_hostname"], "printer");
    }

    #[tokio::test]
    async fn test_oui_backfill_skips_unknown_vendor() {
        let pool = store::init("sqlite::memory:").await.unwrap();
        upsert_from_arp(&pool, "ff:ff:ff:11:22:33", "192.168.1.70", false, false, 1000)
            .await
            .unwrap();
        let oui = OuiDatabase::parse("28:6F:B9\tNokia Shanghai Bell Co., Ltd.\n");
        backfill_oui_vendor(&pool, &oui).await.unwrap();

        let metadata: String =
            sqlx::query_scalar("SELECT metadata_json FROM devices WHERE mac_address = ?1")
                .bind("ff:ff:ff:11:22:33")
                .fetch_one(&pool)
                .await
                .unwrap();
        let value: serde_json::Value = serde_json::from_str(&metadata).unwrap();
        assert!(value.get("oui_vendor").is_none());
    }

    #[tokio::test]
    async fn test_inspected_victims_excludes_gateway() {
        let pool = store::init("sqlite::memory:").await.unwrap();
        upsert_from_arp(&pool, "aa:bb:cc:00:00:01", "192.168.1.1", true, true, 1000)
            .await
            .unwrap();
        upsert_from_arp(&pool, "aa:bb:cc:00:00:02", "192.168.1.50", false, true, 1000)
            .await
            .unwrap();

        let victims = inspected_victims(&pool).await.unwrap();
        assert_eq!(victims.len(), 1);
        assert_eq!(victims[0].mac_address, "aa:bb:cc:00:00:02");
    }
}
