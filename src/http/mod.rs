//! HTTP/1.1 protocol layer.
//!
//! - [`codec`]: request/response encoding and incremental decoding
//! - [`exchange`]: per-exchange state tracking
//! - [`transaction`]: one client exchange over an established stream
//! - [`redirect`] and [`retry`]: the client's follow-up decisions
//! - [`server`]: accept loop and server exchanges

pub mod codec;
pub mod exchange;
pub mod redirect;
pub mod request;
pub mod response;
pub mod retry;
pub mod server;
pub mod transaction;

pub use codec::{
    decode_response, encode_request, encode_response, Framing, RequestDecoder, RequestHead,
    ResponseDecoder, ResponseHead,
};
pub use exchange::Exchange;
pub use redirect::{RedirectAuthHeaders, RedirectPolicy};
pub use request::{HttpRequest, RequestBody};
pub use response::HttpResponse;
pub use retry::RetryReason;
pub use server::{
    handler_fn, Handler, HandlerFn, HttpServer, ServerConfig, ServerRequest, ServerResponse,
};
pub use transaction::{HttpNetworkTransaction, TransactionOutcome};
