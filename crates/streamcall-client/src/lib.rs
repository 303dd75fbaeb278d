//! Client call adapter for the streamcall protocol.
//!
//! [`StreamCallClient::invoke`] asks for single-record delivery and returns a
//! [`PendingCompletion`]. [`StreamCallClient::invoke_streaming`] asks for
//! incremental delivery and returns a [`StreamingCall`] whose `fragments`
//! stream and `completion` future are two views of one HTTP exchange.
//!
//! ```no_run
//! use futures::StreamExt as _;
//! use streamcall_client::{ClientConfig, ClientError, StreamCallClient};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), ClientError> {
//! let client = StreamCallClient::new(ClientConfig::new("http://127.0.0.1:8787"))?;
//!
//! let mut call = client.invoke_streaming("The server is down.")?;
//! while let Some(fragment) = call.fragments.next().await {
//!     print!("{}", fragment.partial);
//! }
//! let completion = call.completion.await?;
//! println!("\n{completion}");
//! # Ok(())
//! # }
//! ```

/// Call handles: fragment stream, completion future and cancellation.
pub mod call;
/// HTTP client and the per-call pump task.
pub mod client;
/// Client configuration.
pub mod config;
/// Client error taxonomy.
pub mod errors;

pub use call::{CancelHandle, FragmentStream, PendingCompletion, StreamingCall};
pub use client::StreamCallClient;
pub use config::ClientConfig;
pub use errors::ClientError;
