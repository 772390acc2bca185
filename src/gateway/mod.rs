//! Backend call gateway: `{action, params}` in, `{ok, status, data}` out.

mod client;
mod envelope;

pub use client::{endpoint_from_page_url, Gateway, HttpTransport, RawResponse, Transport};
pub use envelope::{CallRequest, CallResponse, ParsedBody};
