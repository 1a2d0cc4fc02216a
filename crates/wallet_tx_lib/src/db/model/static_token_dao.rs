use serde::Serialize;

#[derive(Serialize, sqlx::FromRow, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StaticTokenDao {
    pub address: String,
    pub chain_type: String,
    pub symbol: String,
    pub name: String,
    pub decimals: i64,
    pub logo: Option<String>,
}
