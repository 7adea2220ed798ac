//! # transcriptor-core
//!
//! Core library for transcriptor - a Dataverse transcript retrieval
//! pipeline for Dynamics 365 Customer Service workstreams.
//!
//! This library provides:
//! - Token acquisition with a file-backed cache and a strict priority chain
//! - A generic OData / FetchXML client with pagination
//! - A three-wave batched join (conversations, transcripts, annotations)
//!   that decodes, validates, and persists one transcript file per
//!   conversation
//!
//! ## Example
//!
//! ```rust,no_run
//! use transcriptor_core::auth::Authenticator;
//! use transcriptor_core::dataverse::DataverseClient;
//! use transcriptor_core::pipeline::TranscriptPipeline;
//! use transcriptor_core::Config;
//!
//! # async fn run() -> transcriptor_core::Result<()> {
//! let config = Config::load()?;
//! config.validate()?;
//!
//! let token = Authenticator::new(&config).access_token().await?;
//! let client = DataverseClient::new(
//!     &token,
//!     config.organization_url_trimmed(),
//!     &config.api_version,
//! )?;
//! let summary = TranscriptPipeline::new(&client, &config)?.run().await?;
//! println!("downloaded {} transcripts", summary.transcripts_downloaded);
//! # Ok(())
//! # }
//! ```

// Re-export commonly used items at the crate root
pub use config::{Config, OutputPathStrategy};
pub use dataverse::entities::DownloadSummary;
pub use error::{Error, Result};

// Public modules
pub mod auth;
pub mod config;
pub mod dataverse;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod validators;
