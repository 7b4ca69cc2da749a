//! Accumulating upserts against the `network_flows` table (§3, §4.B, §4.G
//! flow aggregator) and the periodic hostname backfill.

use sqlx::SqlitePool;

/// One bucketed flow observation to accumulate. `tcp_seq` is `Some` only for
/// TCP frames.
pub struct FlowObservation<'a> {
    pub timestamp: i64,
    pub src_mac: &'a str,
    pub dest_mac: &'a str,
    pub src_ip: &'a str,
    pub dest_ip: &'a str,
    pub src_port: u16,
    pub dest_port: u16,
    pub protocol: &'a str,
    pub byte_len: u32,
    pub tcp_seq: Option<u32>,
}

/// Upsert a flow row: `byte_count`/`packet_count` accumulate, and for TCP
/// frames `tcp_seq_min`/`tcp_seq_max` in `metadata_json` track the running
/// MIN/MAX (§4.B conflict policy). Both statements run in one transaction so
/// the pair is atomic under a single lock acquisition (§5).
pub async fn upsert(pool: &SqlitePool, obs: &FlowObservation<'_>) -> Result<(), sqlx::Error> {
    let initial_metadata = match obs.tcp_seq {
        Some(seq) => serde_json::json!({ "tcp_seq_min": seq, "tcp_seq_max": seq }).to_string(),
        None => "{}".to_string(),
    };

    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"INSERT INTO network_flows
           (timestamp, src_mac, dest_mac, src_ip, dest_ip, src_port, dest_port, protocol,
            byte_count, packet_count, metadata_json)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 1, ?10)
           ON CONFLICT(timestamp, src_mac, dest_mac, src_ip, dest_ip, src_port, dest_port, protocol)
           DO UPDATE SET
               byte_count = network_flows.byte_count + excluded.byte_count,
               packet_count = network_flows.packet_count + 1"#,
    )
    .bind(obs.timestamp)
    .bind(obs.src_mac)
    .bind(obs.dest_mac)
    .bind(obs.src_ip)
    .bind(obs.dest_ip)
    .bind(obs.src_port)
    .bind(obs.dest_port)
    .bind(obs.protocol)
    .bind(obs.byte_len)
    .bind(&initial_metadata)
    .execute(&mut *tx)
    .await?;

    if let Some(seq) = obs.tcp_seq {
        sqlx::query(
            r#"UPDATE network_flows SET metadata_json = json_set(
                   json_set(
                       metadata_json,
                       '$.tcp_seq_min',
                       MIN(COALESCE(json_extract(metadata_json, '$.tcp_seq_min'), ?1), ?1)
                   ),
                   '$.tcp_seq_max',
                   MAX(COALESCE(json_extract(metadata_json, '$.tcp_seq_max'), ?1), ?1)
               )
               WHERE timestamp = ?2 AND src_mac = ?3 AND dest_mac = ?4 AND src_ip = ?5
                 AND dest_ip = ?6 AND src_port = ?7 AND dest_port = ?8 AND protocol = ?9"#,
        )
        .bind(seq)
        .bind(obs.timestamp)
        .bind(obs.src_mac)
        .bind(obs.dest_mac)
        .bind(obs.src_ip)
        .bind(obs.dest_ip)
        .bind(obs.src_port)
        .bind(obs.dest_port)
        .bind(obs.protocol)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Fill `src_hostname`/`dest_hostname` on flow rows where they're still null
/// and a matching hostname row now exists. Callers gate this to run at most
/// every 2s (§4.G).
pub async fn backfill_hostnames(pool: &SqlitePool) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"UPDATE network_flows SET
               src_hostname = COALESCE(src_hostname, (
                   SELECT hostname FROM hostnames
                   WHERE hostnames.ip_address = network_flows.src_ip
                   ORDER BY updated_ts DESC LIMIT 1
               )),
               dest_hostname = COALESCE(dest_hostname, (
                   SELECT hostname FROM hostnames
                   WHERE hostnames.ip_address = network_flows.dest_ip
                   ORDER BY updated_ts DESC LIMIT 1
               ))
           WHERE (src_hostname IS NULL OR dest_hostname IS NULL)
             AND EXISTS (
                 SELECT 1 FROM hostnames
                 WHERE hostnames.ip_address IN (network_flows.src_ip, network_flows.dest_ip)
             )"#,
    )
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store;

    fn udp_obs(ts: i64) -> FlowObservation<'static> {
        FlowObservation {
            timestamp: ts,
            src_mac: "aa:bb:cc:00:00:01",
            dest_mac: "aa:bb:cc:00:00:02",
            src_ip: "192.168.1.50",
            dest_ip: "203.0.113.5",
            src_port: 54321,
            dest_port: 443,
            protocol: "tcp",
            byte_len: 120,
            tcp_seq: None,
        }
    }

    #[tokio::test]
    async fn test_two_identical_packets_accumulate() {
        let pool = store::init("sqlite::memory:").await.unwrap();
        let obs = FlowObservation {
            tcp_seq: Some(1000),
            ..udp_obs(1_700_000_000)
        };
        upsert(&pool, &obs).await.unwrap();
        let obs2 = FlowObservation {
            tcp_seq: Some(1500),
            ..udp_obs(1_700_000_000)
        };
        upsert(&pool, &obs2).await.unwrap();

        let row: (i64, i64, String) =
            sqlx::query_as("SELECT byte_count, packet_count, metadata_json FROM network_flows")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(row.0, 240);
        assert_eq!(row.1, 2);
        let metadata: serde_json::Value = serde_json::from_str(&row.2).unwrap();
        assert_eq!(metadata["tcp_seq_min"], 1000);
        assert_eq!(metadata["tcp_seq_max"], 1500);
    }

    #[tokio::test]
    async fn test_distinct_seconds_produce_distinct_rows() {
        let pool = store::init("sqlite::memory:").await.unwrap();
        upsert(&pool, &udp_obs(1000)).await.unwrap();
        upsert(&pool, &udp_obs(1001)).await.unwrap();

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM network_flows")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count.0, 2);
    }

    #[tokio::test]
    async fn test_backfill_hostnames_fills_matching_rows() {
        let pool = store::init("sqlite::memory:").await.unwrap();
        upsert(&pool, &udp_obs(1000)).await.unwrap();
        crate::store::hostnames::insert_or_ignore(
            &pool,
            "aa:bb:cc:00:00:01",
            "192.168.1.50",
            "victim.local",
            "dns",
            900,
        )
        .await
        .unwrap();

        let affected = backfill_hostnames(&pool).await.unwrap();
        assert_eq!(affected, 1);

        let src_hostname: Option<String> =
            sqlx::query_scalar("SELECT src_hostname FROM network_flows LIMIT 1")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(src_hostname.as_deref(), Some("victim.local"));
    }

    #[tokio::test]
    async fn test_backfill_is_idempotent() {
        let pool = store::init("sqlite::memory:").await.unwrap();
        upsert(&pool, &udp_obs(1000)).await.unwrap();
        crate::store::hostnames::insert_or_ignore(
            &pool,
            "aa:bb:cc:00:00:01",
            "192.168.1.50",
            "victim.local",
            "dns",
            900,
        )
        .await
        .unwrap();

        backfill_hostnames(&pool).await.unwrap();
        let second_pass = backfill_hostnames(&pool).await.unwrap();
        assert_eq!(second_pass, 0, "already-backfilled rows should not match again");
    }
}
