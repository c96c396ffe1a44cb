pub mod error;

pub use error::{EngineFailure, Result, TxError};
