//! Client SDK for the Gust job orchestration platform.
//!
//! Every operation is a thin translation from a function call to one
//! authenticated REST request against a Gust server (or, for
//! [`jobs::wait_job`], a short poll loop). Construct a [`Client`] once per
//! scope, either explicitly via [`Client::builder`] or from the `GUST_*`
//! environment inside a running job via [`Client::from_env`], and pass it to
//! the free functions in the domain modules.
//!
//! ```no_run
//! use gust_client::{jobs, Client};
//! use serde_json::json;
//!
//! fn main() -> gust_client::Result<()> {
//!     let client = Client::from_env()?;
//!     let result = jobs::run_script_by_path(
//!         &client,
//!         "u/alice/hello",
//!         &json!({ "name": "world" }),
//!         &jobs::WaitOptions::default(),
//!     )?;
//!     println!("{result}");
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod error;
pub mod jobs;
pub mod mock;
pub mod notify;
pub mod resources;
pub mod s3;
pub mod variables;

pub use client::{Client, ClientBuilder};
pub use error::{Error, Result};
pub use jobs::{CancelGuard, JobStatus, WaitOptions};
pub use s3::{FileContent, S3Object, UploadOptions};
