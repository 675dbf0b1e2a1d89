//! Error taxonomy for the payment pipeline.

use thiserror::Error;

use crate::network::NetworkContext;

pub type Result<T> = std::result::Result<T, PaymentError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PaymentError {
    /// The ledger proxy has no credentials for the requested network.
    #[error("gateway misconfigured: {0}")]
    ConfigMissing(String),

    #[error("network mismatch: wallet is on {wallet}, but {selected} is selected")]
    NetworkMismatch { wallet: NetworkContext, selected: NetworkContext },

    #[error("{0} wallets are not supported for transfers; switch the wallet to a test network")]
    UnsupportedNetwork(NetworkContext),

    #[error("unrecognized network: {0}")]
    UnknownNetwork(String),

    #[error("no spendable outputs in wallet")]
    NoFunds,

    #[error("insufficient funds: need {required} lovelace, have {available}")]
    InsufficientFunds { required: u64, available: u64 },

    #[error("unbalanced transaction: inputs {inputs} != outputs {outputs} + fee {fee}")]
    Unbalanced { inputs: u64, outputs: u64, fee: u64 },

    #[error("arithmetic overflow while computing {0}")]
    Overflow(&'static str),

    #[error("transaction was already submitted; wait for confirmation")]
    DuplicateSubmission,

    #[error("{0}")]
    Transport(String),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("transaction is {size} bytes, protocol limit is {max}")]
    TxTooLarge { size: u64, max: u64 },

    #[error("wallet error: {0}")]
    Wallet(String),

    #[error("another transaction is already being sent")]
    AttemptInProgress,

    #[error("storage error: {0}")]
    Storage(String),
}

impl PaymentError {
    /// Whether the caller may start a fresh attempt without user intervention.
    /// Only transport failures and a busy service can clear up without the
    /// user changing anything; nothing in the pipeline retries on its own.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PaymentError::Transport(_) | PaymentError::AttemptInProgress)
    }
}

impl From<minicbor::decode::Error> for PaymentError {
    fn from(e: minicbor::decode::Error) -> Self {
        PaymentError::Decode(e.to_string())
    }
}

impl From<reqwest::Error> for PaymentError {
    fn from(e: reqwest::Error) -> Self {
        PaymentError::Transport(e.to_string())
    }
}
