//! # tutorgen-protocol: client contract types
//!
//! Shared types and trait interfaces for the tutorgen client core. Kept free
//! of runtime dependencies (no tokio, no reqwest) so every other crate can
//! depend on it as a pure contract.
//!
//! ## Module Overview
//!
//! - [`session`]: Session, UserProfile, UserId
//! - [`wire`]: request/response bodies of the backend endpoints
//! - [`ports`]: HTTP transport and navigation boundaries
//! - [`error`]: ClientError, ClientResult

pub mod error;
pub mod ports;
pub mod session;
pub mod wire;

pub use error::{ClientError, ClientResult};
pub use ports::{ApiRequest, ApiResponse, HttpMethod, HttpTransport, Navigator};
pub use session::{Session, UserId, UserProfile};
pub use wire::{
    Difficulty, ErrorBody, GenerationOptions, GenerationStatusResponse, LoginRequest,
    LoginResponse, PendingGeneration, RefreshResponse, SubmitGenerationRequest,
    SubmitGenerationResponse,
};
