use crate::db::model::*;
use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

pub async fn find_approval(
    conn: &mut SqliteConnection,
    owner: &str,
    chain_id: i64,
    token_addr: &str,
    spender: &str,
) -> Result<Option<ApprovalDao>, sqlx::Error> {
    let row = sqlx::query_as::<_, ApprovalDao>(
        r"SELECT * FROM approval
WHERE owner = $1 AND chain_id = $2 AND token_addr = $3 AND spender = $4",
    )
    .bind(owner)
    .bind(chain_id)
    .bind(token_addr)
    .bind(spender)
    .fetch_optional(conn)
    .await?;
    Ok(row)
}

/// Records an approval pending its live read, unless an approval at least as recent
/// is already known or was revoked for the same key. Returns true when the row was
/// written.
pub async fn upsert_approval_if_newer(
    conn: &mut SqliteConnection,
    approval: &ApprovalDao,
) -> Result<bool, sqlx::Error> {
    let res = sqlx::query(
        r"INSERT INTO approval
(owner, chain_id, token_addr, spender, initial_allowance, allowance, approve_date, tx_hash, checked_date)
SELECT $1, $2, $3, $4, $5, $6, $7, $8, NULL
WHERE NOT EXISTS (
    SELECT 1 FROM revoked_approval
    WHERE owner = $1 AND chain_id = $2 AND token_addr = $3 AND spender = $4 AND approve_date >= $7
)
ON CONFLICT (owner, chain_id, token_addr, spender) DO UPDATE SET
initial_allowance = excluded.initial_allowance,
allowance = excluded.allowance,
approve_date = excluded.approve_date,
tx_hash = excluded.tx_hash,
checked_date = NULL
WHERE excluded.approve_date > approval.approve_date
",
    )
    .bind(&approval.owner)
    .bind(approval.chain_id)
    .bind(&approval.token_addr)
    .bind(&approval.spender)
    .bind(&approval.initial_allowance)
    .bind(&approval.allowance)
    .bind(approval.approve_date)
    .bind(&approval.tx_hash)
    .execute(conn)
    .await?;
    Ok(res.rows_affected() > 0)
}

pub async fn update_approval_allowance(
    conn: &mut SqliteConnection,
    id: i64,
    allowance: &str,
    checked_date: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query(r"UPDATE approval SET allowance = $2, checked_date = $3 WHERE id = $1")
        .bind(id)
        .bind(allowance)
        .bind(checked_date)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn delete_approval(conn: &mut SqliteConnection, id: i64) -> Result<(), sqlx::Error> {
    sqlx::query(r"DELETE FROM approval WHERE id = $1")
        .bind(id)
        .execute(conn)
        .await?;
    Ok(())
}

/// Deletes an entry whose live allowance read as zero and remembers its approve date,
/// so approvals up to that date are not recorded again.
pub async fn revoke_approval(
    conn: &mut SqliteConnection,
    approval: &ApprovalDao,
) -> Result<(), sqlx::Error> {
    delete_approval(&mut *conn, approval.id).await?;
    sqlx::query(
        r"INSERT INTO revoked_approval (owner, chain_id, token_addr, spender, approve_date)
VALUES ($1, $2, $3, $4, $5)
ON CONFLICT (owner, chain_id, token_addr, spender) DO UPDATE SET
approve_date = excluded.approve_date
WHERE excluded.approve_date > revoked_approval.approve_date
",
    )
    .bind(&approval.owner)
    .bind(approval.chain_id)
    .bind(&approval.token_addr)
    .bind(&approval.spender)
    .bind(approval.approve_date)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn get_approvals(
    conn: &mut SqliteConnection,
    owner: &str,
    chain_id: i64,
) -> Result<Vec<ApprovalDao>, sqlx::Error> {
    let rows = sqlx::query_as::<_, ApprovalDao>(
        r"SELECT * FROM approval WHERE owner = $1 AND chain_id = $2 ORDER BY token_addr, spender",
    )
    .bind(owner)
    .bind(chain_id)
    .fetch_all(conn)
    .await?;
    Ok(rows)
}

/// Entries still waiting for a live allowance read.
pub async fn get_pending_approvals(
    conn: &mut SqliteConnection,
    chain_id: i64,
) -> Result<Vec<ApprovalDao>, sqlx::Error> {
    let rows = sqlx::query_as::<_, ApprovalDao>(
        r"SELECT * FROM approval WHERE chain_id = $1 AND checked_date IS NULL ORDER BY id",
    )
    .bind(chain_id)
    .fetch_all(conn)
    .await?;
    Ok(rows)
}

pub async fn get_all_approvals_on_chain(
    conn: &mut SqliteConnection,
    chain_id: i64,
) -> Result<Vec<ApprovalDao>, sqlx::Error> {
    let rows =
        sqlx::query_as::<_, ApprovalDao>(r"SELECT * FROM approval WHERE chain_id = $1 ORDER BY id")
            .bind(chain_id)
            .fetch_all(conn)
            .await?;
    Ok(rows)
}

pub async fn get_approval_groups(
    conn: &mut SqliteConnection,
    owner: &str,
    chain_id: i64,
) -> Result<Vec<ApprovalEventGroup>, sqlx::Error> {
    let rows = get_approvals(conn, owner, chain_id).await?;
    Ok(ApprovalEventGroup::from_rows(rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_sqlite_connection;
    use chrono::{Duration, TimeZone};

    fn approval(date: DateTime<Utc>, spender: &str) -> ApprovalDao {
        ApprovalDao {
            id: 0,
            owner: "0xowner".to_string(),
            chain_id: 1,
            token_addr: "0xtoken".to_string(),
            spender: spender.to_string(),
            initial_allowance: "0x64".to_string(),
            allowance: "0".to_string(),
            approve_date: date,
            tx_hash: "0xhash".to_string(),
            checked_date: None,
        }
    }

    #[tokio::test]
    async fn test_only_newer_approvals_overwrite() {
        let mut conn = create_sqlite_connection(None, true).await.unwrap();
        let t0 = Utc.timestamp_opt(1_690_000_000, 0).unwrap();
        assert!(upsert_approval_if_newer(&mut conn, &approval(t0, "0xs1"))
            .await
            .unwrap());
        assert!(!upsert_approval_if_newer(&mut conn, &approval(t0, "0xs1"))
            .await
            .unwrap());

        let stored = find_approval(&mut conn, "0xowner", 1, "0xtoken", "0xs1")
            .await
            .unwrap()
            .unwrap();
        update_approval_allowance(&mut conn, stored.id, "0x64", t0)
            .await
            .unwrap();
        assert!(get_pending_approvals(&mut conn, 1).await.unwrap().is_empty());

        let mut newer = approval(t0 + Duration::seconds(10), "0xs1");
        newer.initial_allowance = "0xff".to_string();
        assert!(upsert_approval_if_newer(&mut conn, &newer).await.unwrap());
        let pending = get_pending_approvals(&mut conn, 1).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].initial_allowance, "0xff");
    }

    #[tokio::test]
    async fn test_groups_by_token() {
        let mut conn = create_sqlite_connection(None, true).await.unwrap();
        let t0 = Utc.timestamp_opt(1_690_000_000, 0).unwrap();
        upsert_approval_if_newer(&mut conn, &approval(t0, "0xs1"))
            .await
            .unwrap();
        upsert_approval_if_newer(&mut conn, &approval(t0, "0xs2"))
            .await
            .unwrap();
        let groups = get_approval_groups(&mut conn, "0xowner", 1).await.unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].spenders.len(), 2);

        let id = get_all_approvals_on_chain(&mut conn, 1).await.unwrap()[0].id;
        delete_approval(&mut conn, id).await.unwrap();
        let groups = get_approval_groups(&mut conn, "0xowner", 1).await.unwrap();
        assert_eq!(groups[0].spenders.len(), 1);
    }

    #[tokio::test]
    async fn test_revoked_approval_stays_revoked() {
        let mut conn = create_sqlite_connection(None, true).await.unwrap();
        let t0 = Utc.timestamp_opt(1_690_000_000, 0).unwrap();
        assert!(upsert_approval_if_newer(&mut conn, &approval(t0, "0xs1"))
            .await
            .unwrap());
        let stored = find_approval(&mut conn, "0xowner", 1, "0xtoken", "0xs1")
            .await
            .unwrap()
            .unwrap();
        revoke_approval(&mut conn, &stored).await.unwrap();
        assert!(find_approval(&mut conn, "0xowner", 1, "0xtoken", "0xs1")
            .await
            .unwrap()
            .is_none());

        assert!(!upsert_approval_if_newer(&mut conn, &approval(t0, "0xs1"))
            .await
            .unwrap());
        assert!(!upsert_approval_if_newer(&mut conn, &approval(t0 - Duration::seconds(5), "0xs1"))
            .await
            .unwrap());
        assert!(upsert_approval_if_newer(&mut conn, &approval(t0, "0xs2"))
            .await
            .unwrap());
        assert_eq!(get_pending_approvals(&mut conn, 1).await.unwrap().len(), 1);

        assert!(upsert_approval_if_newer(&mut conn, &approval(t0 + Duration::seconds(10), "0xs1"))
            .await
            .unwrap());
        assert_eq!(get_pending_approvals(&mut conn, 1).await.unwrap().len(), 2);
    }
}
