// =============================================================================
// Exchange collaborator interfaces
// =============================================================================
//
// The core treats the exchange transport as an external collaborator (spec
// §6): only the interface is specified here. `rest` defines the signed REST
// surface (`ExchangeRest`) plus one reference adapter; `stream` defines the
// normalization layer that turns raw WS envelopes into the engine's internal
// update types.

pub mod rate_limit;
pub mod rest;
pub mod stream;

pub use rest::{ExchangeRest, OrderKind, OrderResult, OrderState, RestClient, TickerInfo};
pub use stream::{normalize, run_private_stream, run_public_stream, StreamUpdate};
