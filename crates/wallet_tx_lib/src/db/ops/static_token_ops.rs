use crate::db::model::*;
use sqlx::SqliteConnection;

pub async fn insert_static_token(
    conn: &mut SqliteConnection,
    token: &StaticTokenDao,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r"INSERT INTO static_tokens (address, chain_type, symbol, name, decimals, logo)
VALUES ($1, $2, $3, $4, $5, $6)
ON CONFLICT (address, chain_type) DO UPDATE SET
symbol = excluded.symbol, name = excluded.name, decimals = excluded.decimals, logo = excluded.logo
",
    )
    .bind(token.address.to_lowercase())
    .bind(&token.chain_type)
    .bind(&token.symbol)
    .bind(&token.name)
    .bind(token.decimals)
    .bind(&token.logo)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn get_static_token(
    conn: &mut SqliteConnection,
    address: &str,
    chain_type: &str,
) -> Result<Option<StaticTokenDao>, sqlx::Error> {
    let row = sqlx::query_as::<_, StaticTokenDao>(
        r"SELECT * FROM static_tokens WHERE address = $1 AND chain_type = $2",
    )
    .bind(address.to_lowercase())
    .bind(chain_type)
    .fetch_optional(conn)
    .await?;
    Ok(row)
}

/// Case-insensitive search over symbol and name. Exact symbol matches come first,
/// then symbol prefixes, then any other match.
pub async fn search_static_tokens(
    conn: &mut SqliteConnection,
    query: &str,
    chain_type: Option<&str>,
    limit: i64,
) -> Result<Vec<StaticTokenDao>, sqlx::Error> {
    let query = query.trim().to_lowercase();
    let pattern = format!(
        "%{}%",
        query.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
    );
    let prefix = format!("{}%", &pattern[1..]);
    let rows = sqlx::query_as::<_, StaticTokenDao>(
        r"SELECT * FROM static_tokens
WHERE ($1 IS NULL OR chain_type = $1)
AND (LOWER(symbol) LIKE $2 ESCAPE '\' OR LOWER(name) LIKE $2 ESCAPE '\')
ORDER BY
  CASE WHEN LOWER(symbol) = $3 THEN 0
       WHEN LOWER(symbol) LIKE $4 ESCAPE '\' THEN 1
       ELSE 2 END,
  symbol
LIMIT $5",
    )
    .bind(chain_type)
    .bind(&pattern)
    .bind(&query)
    .bind(&prefix)
    .bind(limit)
    .fetch_all(conn)
    .await?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_sqlite_connection;

    fn token(address: &str, symbol: &str, name: &str) -> StaticTokenDao {
        StaticTokenDao {
            address: address.to_string(),
            chain_type: "ethereum".to_string(),
            symbol: symbol.to_string(),
            name: name.to_string(),
            decimals: 18,
            logo: None,
        }
    }

    #[tokio::test]
    async fn test_fuzzy_search_ranks_exact_symbol_first() {
        let mut conn = create_sqlite_connection(None, true).await.unwrap();
        insert_static_token(&mut conn, &token("0xA1", "USDCX", "Wrapped usdc"))
            .await
            .unwrap();
        insert_static_token(&mut conn, &token("0xA2", "USDC", "USD Coin"))
            .await
            .unwrap();
        insert_static_token(&mut conn, &token("0xA3", "DAI", "Dai Stablecoin"))
            .await
            .unwrap();

        let found = search_static_tokens(&mut conn, "usdc", None, 10).await.unwrap();
        assert_eq!(
            found.iter().map(|t| t.symbol.as_str()).collect::<Vec<_>>(),
            vec!["USDC", "USDCX"]
        );
        let by_name = search_static_tokens(&mut conn, "stable", Some("ethereum"), 10)
            .await
            .unwrap();
        assert_eq!(by_name.len(), 1);
        assert!(search_static_tokens(&mut conn, "dai", Some("bsc"), 10)
            .await
            .unwrap()
            .is_empty());

        let read = get_static_token(&mut conn, "0xa3", "ethereum").await.unwrap().unwrap();
        assert_eq!(read.symbol, "DAI");
    }
}
