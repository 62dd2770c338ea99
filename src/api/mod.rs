//! REST API module
//!
//! Provides the HTTP surface of the wallet service. Proposal routes identify
//! the calling copayer by the `x-identity` header.
//!
//! # Endpoints
//!
//! ## Wallets
//! - `POST /wallets` - Register an M-of-N wallet
//! - `GET /wallets/:id` - Wallet details and balance
//! - `POST /wallets/:id/copayers` - Join a copayer
//! - `POST /wallets/:id/addresses` - Derive the next receive/change address
//! - `POST /wallets/:id/utxos` - Record received funds
//!
//! ## Proposals
//! - `POST /txproposals` - Create and publish
//! - `GET /txproposals?walletId=&status=` - List
//! - `GET /txproposals/:id` - Get
//! - `POST /txproposals/:id/publish` - Publish a draft
//! - `POST /txproposals/:id/signatures` - Submit a signature set
//! - `POST /txproposals/:id/rejections` - Reject
//! - `POST /txproposals/:id/broadcast` - Broadcast
//! - `DELETE /txproposals/:id` - Remove
//!
//! Errors, malformed JSON bodies included, are returned as
//! `{ "code": ..., "error": ... }`.

pub mod handlers;
pub mod routes;

pub use handlers::{ApiError, ApiJson, ApiState, IDENTITY_HEADER};
pub use routes::create_router;
