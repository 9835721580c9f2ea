//! External service clients: CLOB trading API, data API positions,
//! and the gasless relay for on-chain redemption

pub mod clob;
pub mod positions;
pub mod reauth;
pub mod redeem;

pub use clob::{ClobClient, OrderGateway, OrderReceipt, OrderRequest, SessionApi};
pub use positions::{DataApiSource, PositionSource, PositionTracker};
pub use reauth::ReauthGateway;
pub use redeem::{BuilderCredentials, Redeemer, RedeemRequest, RelayRedeemer};
