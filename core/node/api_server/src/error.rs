//! Mapping of internal failures onto JSON-RPC error objects. Not-found
//! conditions are typed nulls, never errors; validation failures surface as
//! application errors and are not retried by clients.

use jsonrpsee::types::{ErrorObject, ErrorObjectOwned};

pub(crate) const VALIDATION_ERROR_CODE: i32 = -32000;
pub(crate) const CHAIN_RPC_ERROR_CODE: i32 = -32001;
pub(crate) const REORG_IN_PROGRESS_CODE: i32 = -32002;
pub(crate) const INTERNAL_ERROR_CODE: i32 = -32603;

pub(crate) fn validation_error(message: impl Into<String>) -> ErrorObjectOwned {
    ErrorObject::owned(VALIDATION_ERROR_CODE, message.into(), None::<()>)
}

pub(crate) fn chain_error(message: impl std::fmt::Display) -> ErrorObjectOwned {
    ErrorObject::owned(CHAIN_RPC_ERROR_CODE, message.to_string(), None::<()>)
}

pub(crate) fn reorg_in_progress() -> ErrorObjectOwned {
    ErrorObject::owned(
        REORG_IN_PROGRESS_CODE,
        "reorg in progress; retry shortly".to_string(),
        None::<()>,
    )
}

pub(crate) fn internal_error(message: impl std::fmt::Display) -> ErrorObjectOwned {
    ErrorObject::owned(INTERNAL_ERROR_CODE, message.to_string(), None::<()>)
}
