// Library interface for the coffee wallet payment pipeline.
// The binary and the integration tests both go through here.

pub mod error;
pub mod address;
pub mod address_book;
pub mod amount;
pub mod cbor;
pub mod network;
pub mod utxo;
pub mod fee;
pub mod tx;
pub mod wallet;
pub mod gateway;
pub mod storage;
pub mod history;
pub mod config;
pub mod submit;

pub use error::{PaymentError, Result};
pub use address::Address;
pub use address_book::AddressBook;
pub use network::{NetworkContext, NetworkResolver};
pub use utxo::{InputReservations, InputSet, OutputRef, SpendableOutput};
pub use fee::{ChainTip, FeePolicy, FeeQuote, ProtocolParameters};
pub use tx::{DraftTransaction, SignedTransaction};
pub use wallet::{HttpWallet, WalletCapability};
pub use gateway::{HttpGateway, LedgerGateway, LedgerSnapshot};
pub use storage::Store;
pub use history::{HashOrigin, TxHistory, TxHistoryEntry};
pub use submit::{AttemptState, ExecutionMode, PaymentService, PipelineSettings, SendRequest};
