//! # zimage-studio
//!
//! Async Rust client for the Z-Image text-to-image API.
//!
//! Provides a typed client for the REST surface, a generation session that
//! submits batches of up to four images and polls them to completion, and a
//! paginated history store with bulk deletion.
//!
//! ## Quick Start
//!
//! ```no_run
//! use zimage_studio::{ClientConfig, GenerationSession, GenerationSettings, SessionEvent, ZImageClient};
//!
//! # async fn example() -> zimage_studio::Result<()> {
//! let config = ClientConfig::builder()
//!     .with_endpoint("http://127.0.0.1:8000")
//!     .with_auth_key("my-key")
//!     .build()?;
//! let session = GenerationSession::new(ZImageClient::from_config(&config), config);
//! let mut events = session.subscribe();
//!
//! session.set_prompt("a sunset over mountains");
//! session.update_settings(GenerationSettings {
//!     batch_size: 4,
//!     seed: Some(1234),
//!     ..Default::default()
//! });
//! let batch_id = session.generate().await?;
//!
//! while let Ok(event) = events.recv().await {
//!     if let SessionEvent::BatchFinished { .. } = event {
//!         break;
//!     }
//! }
//!
//! for item in session.snapshot().items {
//!     println!("{} #{}: {:?} {:?}", batch_id, item.index, item.status, item.image_url);
//! }
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod batch;
pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod hints;
pub mod history;
pub mod ids;
pub mod media;
pub mod session;
pub mod types;

pub use api::ImageApi;
pub use batch::{AssignOutcome, GenerationState, PollOutcome, SelectOutcome};
pub use client::ZImageClient;
pub use config::{ClientConfig, ClientConfigBuilder};
pub use error::{Result, StudioError};
pub use events::SessionEvent;
pub use history::{BulkDeleteReport, HistoryStore};
pub use session::GenerationSession;
pub use types::{
    BatchDetail, BatchItem, BatchMeta, BatchSummary, BatchTag, GenerateRequest, GenerateResponse,
    GenerationSettings, GenerationStatus, HealthStatus, ItemStatus, TaskActionResponse,
    TaskStatus, MAX_BATCH_SIZE,
};
