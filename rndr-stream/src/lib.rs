//! Streaming HTTP proxy for upstream audio sources: a bounded buffer queue
//! ([`buf_xchange`]), a polymorphic retryable fetcher ([`net_fetch`]), URL
//! rewriting for pseudo-schemes the player cannot dereference itself
//! ([`url_morph`]), and the proxy server that ties them together
//! ([`proxy`]).

pub mod buf_xchange;
pub mod net_fetch;
pub mod proxy;
pub mod url_morph;

pub use buf_xchange::{ABuffer, BufXChange, XchangeError};
pub use net_fetch::{FetchStatus, FileFetch, HttpFetch, NetFetch};
pub use proxy::{router, serve, StreamProxyConfig, UrlTrans, UrlTransResult};
pub use url_morph::{morph_special_url, MorphResult, ProxyTarget};
