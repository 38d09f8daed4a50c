//! HTTP surface for distributed active learning.
//!
//! Two services ship in the `dal-server` binary:
//!
//! - the orchestrator API ([`create_router`]), backed by either an embedded
//!   ledger or a remote one
//! - a standalone ledger ([`create_ledger_router`]) that
//!   [`RpcLedger`](dal_coordination::RpcLedger) clients talk to
//!
//! Every error response has the shape `{"status": "error", "error": "..."}`.

pub mod api;
pub mod config;
pub mod ledger_service;
pub mod services;

pub use api::{create_router, ApiError, ApiResult};
pub use config::{ServerConfig, ServerConfigError};
pub use ledger_service::create_ledger_router;
pub use services::Services;
