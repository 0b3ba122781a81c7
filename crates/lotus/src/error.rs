use thiserror::Error;

#[derive(Error, Debug)]
pub enum LotusError {
    #[error("RPC connection failed: {0}")]
    RpcConnectionError(String),

    #[error("RPC call {method} failed with code {code}: {message}")]
    RpcError {
        method: String,
        code: i64,
        message: String,
    },

    #[error(
        "lotus API out of sync: chain head reports unixtime {chain_unix} (height: {height}) while walltime is {wall_unix} (delta: {}s)",
        .wall_unix - .chain_unix
    )]
    ChainDesynced {
        chain_unix: i64,
        height: i64,
        wall_unix: i64,
    },

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, LotusError>;
