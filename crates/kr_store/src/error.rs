use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Database(#[from] sqlx::Error),

    #[error("schema migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("vault is locked; unlock it with the relay passphrase")]
    VaultLocked,

    #[error(transparent)]
    Crypto(#[from] kr_crypto::CryptoError),

    #[error("undecodable column value: {0}")]
    Codec(#[from] kr_proto::CodecError),

    /// A row exists but cannot be interpreted.
    #[error("corrupt row in `{table}`: {detail}")]
    Corrupt { table: &'static str, detail: String },

    /// A conditional write lost to a concurrent writer.
    #[error("conflicting write: {0}")]
    Conflict(String),
}

impl StoreError {
    pub(crate) fn corrupt(table: &'static str, detail: impl Into<String>) -> Self {
        Self::Corrupt { table, detail: detail.into() }
    }
}
