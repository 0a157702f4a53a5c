//! # Error Types for the Open Agent SDK
//!
//! This module defines all error types used throughout the SDK, providing comprehensive
//! error handling with detailed context for different failure scenarios.
//!
//! ## Design Philosophy
//!
//! - **Explicit Error Handling**: Uses Rust's `Result<T>` type for all fallible operations
//! - **No Silent Failures**: All errors are propagated explicitly to the caller
//! - **Rich Context**: Each error variant provides specific information about what went wrong
//! - **Easy Conversion**: Automatic conversion from common error types (reqwest, serde_json)
//!
//! ## Error Taxonomy vs. the Agent Loop
//!
//! Not every failure during a run becomes an `Error`. A gadget that fails during execution
//! reports a [`crate::gadget::GadgetOutcome::Error`], which re-enters the conversation as a
//! tool result so the model can see the failure and retry or adapt. The variants here are
//! for failures that abort the run outright: bad configuration, exhausted retries, permanent
//! provider errors, cancellation, and hook-driven rejection. See [`crate::agent`] for how the
//! two interact.
//!
//! ## Usage
//!
//! ```ignore
//! use open_agent::{Error, Result};
//!
//! fn example() -> Result<()> {
//!     // Errors can be created using convenience methods
//!     if some_condition {
//!         return Err(Error::config("Invalid model name"));
//!     }
//!
//!     // Or automatically converted from reqwest/serde_json errors
//!     let response = http_client.get(url).send().await?; // Auto-converts to Error::Http
//!     let json = serde_json::from_str(data)?; // Auto-converts to Error::Json
//!
//!     Ok(())
//! }
//! ```

use thiserror::Error;

// ============================================================================
// TYPE ALIASES
// ============================================================================

/// Type alias for `Result<T, Error>` used throughout the SDK.
///
/// This makes function signatures more concise and ensures consistent error handling
/// across the entire API surface. Instead of writing `std::result::Result<T, Error>`,
/// you can simply write `Result<T>`.
///
/// # Example
///
/// ```rust
/// use open_agent::Result;
///
/// async fn send_request() -> Result<String> {
///     // Function body
///     Ok("Success".to_string())
/// }
/// ```
pub type Result<T> = std::result::Result<T, Error>;

// ============================================================================
// ERROR ENUM
// ============================================================================

/// Comprehensive error type covering all failure modes in the SDK.
///
/// This enum uses the `thiserror` crate to automatically implement `std::error::Error`
/// and provide well-formatted error messages. Each variant represents a different
/// category of failure that can occur during SDK operation.
///
/// ## Error Categories
///
/// - **HTTP**: Network communication failures (connection errors, timeouts, etc.)
/// - **JSON**: Serialization/deserialization failures
/// - **Config**: Invalid configuration parameters, rejected at `build()` time
/// - **Api**: Permanent error responses from the model server
/// - **Stream**: Failures during streaming response or marker processing
/// - **Gadget**: Gadget registration or dispatch-plumbing failures (not execution failures)
/// - **InvalidInput**: Validation failures for user- or model-provided input
/// - **Timeout**: A request or gadget invocation exceeded its configured timeout
/// - **Cancelled**: The run's cancellation token fired
/// - **Hook**: A controller hook rejected the operation it was guarding
/// - **Other**: Catch-all for miscellaneous errors
///
/// ## Automatic Conversions
///
/// The `#[from]` attribute on `Http` and `Json` variants enables automatic conversion
/// from `reqwest::Error` and `serde_json::Error` using the `?` operator, making
/// error propagation seamless.
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request failed due to network issues, connection problems, or HTTP errors.
    ///
    /// This variant wraps `reqwest::Error` and is automatically created when using
    /// the `?` operator on reqwest operations. Common causes include:
    /// - Connection refused (server not running)
    /// - DNS resolution failures
    /// - TLS/SSL certificate errors
    /// - HTTP status errors (4xx, 5xx)
    /// - Network timeouts
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let response = client.post(url).send().await?; // Auto-converts reqwest::Error
    /// ```
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization or deserialization failed.
    ///
    /// This variant wraps `serde_json::Error` and occurs when:
    /// - Parsing invalid JSON from the API
    /// - Serializing request data fails
    /// - JSON structure doesn't match expected schema
    /// - Required fields are missing in JSON
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let value: MyType = serde_json::from_str(json_str)?; // Auto-converts serde_json::Error
    /// ```
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid configuration provided when building `AgentOptions` or a `GadgetDescriptor`.
    ///
    /// Occurs during the builder pattern validation phase when required fields
    /// are missing or invalid values are provided. Common causes:
    /// - Missing required fields (model, base_url, system_prompt)
    /// - Invalid URL format in base_url
    /// - Invalid timeout values
    /// - Invalid max_tokens, temperature, or concurrency ranges
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// return Err(Error::config("base_url is required"));
    /// ```
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Error response received from the model server's API.
    ///
    /// This indicates the HTTP request succeeded, but the API returned an error
    /// response. Common causes:
    /// - Model not found on the server
    /// - Invalid API key or authentication failure
    /// - Rate limiting (after retries are exhausted)
    /// - Server-side errors (500, 502, 503)
    /// - Invalid request format
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// return Err(Error::api("Model 'gpt-4' not found on server"));
    /// ```
    #[error("API error: {0}")]
    Api(String),

    /// Error occurred while processing the streaming response or parsing gadget markers.
    ///
    /// This happens during Server-Sent Events (SSE) parsing or marker-scanning.
    /// Common causes:
    /// - Malformed SSE data
    /// - Connection interrupted mid-stream
    /// - Unexpected end of stream
    /// - A gadget marker that never closes before the stream ends
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// return Err(Error::stream("Unexpected end of SSE stream"));
    /// ```
    #[error("Streaming error: {0}")]
    Stream(String),

    /// Gadget registration or dispatch-plumbing failure.
    ///
    /// Occurs when there are problems with gadget definitions or lookup, as opposed to
    /// a gadget's own execution logic failing (which is reported as a
    /// [`crate::gadget::GadgetOutcome::Error`] and re-enters the conversation instead of
    /// aborting the run):
    /// - Gadget name collision during registration
    /// - Gadget not found by name when dispatching a call
    /// - Invalid gadget schema at registration time
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// return Err(Error::gadget("Gadget 'calculator' not found"));
    /// ```
    #[error("Gadget error: {0}")]
    Gadget(String),

    /// Invalid input provided by the user or produced by the model.
    ///
    /// Validation error for data that doesn't meet requirements:
    /// - Empty prompt string
    /// - Invalid parameter format
    /// - Out of range values
    /// - Malformed gadget call syntax the parser could not recover from
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// return Err(Error::invalid_input("Prompt cannot be empty"));
    /// ```
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A request or gadget invocation exceeded the configured timeout duration.
    ///
    /// This is a dedicated variant (no message needed) because the cause is clear.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// return Err(Error::timeout());
    /// ```
    #[error("Request timeout")]
    Timeout,

    /// The run's cancellation token fired before the run reached a terminal state.
    ///
    /// Raised when the caller cancels a run in progress via its `CancellationToken` and the
    /// loop observes the cancellation between turns or while awaiting a gadget.
    #[error("Run cancelled")]
    Cancelled,

    /// A controller hook returned a `Fail` decision, rejecting the operation it observed.
    ///
    /// Carries the reason the hook supplied, if any.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// return Err(Error::hook("blocked by policy: disallowed gadget"));
    /// ```
    #[error("Hook failed the operation: {0}")]
    Hook(String),

    /// Miscellaneous error that doesn't fit other categories.
    ///
    /// Catch-all variant for unexpected errors or edge cases that don't fit
    /// into the specific categories above. Should be used sparingly.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// return Err(Error::other("Unexpected condition occurred"));
    /// ```
    #[error("Error: {0}")]
    Other(String),
}

// ============================================================================
// CONVENIENCE CONSTRUCTORS
// ============================================================================

/// Implementation of convenience constructors for creating Error instances.
///
/// These methods provide a more ergonomic API for creating errors compared to
/// directly constructing the enum variants. They accept `impl Into<String>`,
/// allowing callers to pass `&str`, `String`, or any other type that converts to `String`.
impl Error {
    /// Create a new configuration error with a descriptive message.
    ///
    /// # Example
    ///
    /// ```rust
    /// use open_agent::Error;
    ///
    /// let err = Error::config("base_url must be a valid HTTP or HTTPS URL");
    /// assert_eq!(err.to_string(), "Invalid configuration: base_url must be a valid HTTP or HTTPS URL");
    /// ```
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a new API error with the server's error message.
    ///
    /// # Example
    ///
    /// ```rust
    /// use open_agent::Error;
    ///
    /// let err = Error::api("Model 'invalid-model' not found");
    /// assert_eq!(err.to_string(), "API error: Model 'invalid-model' not found");
    /// ```
    pub fn api(msg: impl Into<String>) -> Self {
        Error::Api(msg.into())
    }

    /// Create a new streaming error for SSE parsing or marker-scanning failures.
    ///
    /// # Example
    ///
    /// ```rust
    /// use open_agent::Error;
    ///
    /// let err = Error::stream("Unexpected end of SSE stream");
    /// assert_eq!(err.to_string(), "Streaming error: Unexpected end of SSE stream");
    /// ```
    pub fn stream(msg: impl Into<String>) -> Self {
        Error::Stream(msg.into())
    }

    /// Create a new gadget plumbing error (registration, lookup, schema validation).
    ///
    /// # Example
    ///
    /// ```rust
    /// use open_agent::Error;
    ///
    /// let err = Error::gadget("Gadget 'calculator' not found");
    /// assert_eq!(err.to_string(), "Gadget error: Gadget 'calculator' not found");
    /// ```
    pub fn gadget(msg: impl Into<String>) -> Self {
        Error::Gadget(msg.into())
    }

    /// Create a new invalid input error for user- or model-provided input.
    ///
    /// # Example
    ///
    /// ```rust
    /// use open_agent::Error;
    ///
    /// let err = Error::invalid_input("Prompt cannot be empty");
    /// assert_eq!(err.to_string(), "Invalid input: Prompt cannot be empty");
    /// ```
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }

    /// Create a new miscellaneous error for cases that don't fit other categories.
    ///
    /// # Example
    ///
    /// ```rust
    /// use open_agent::Error;
    ///
    /// let err = Error::other("Unexpected internal state");
    /// assert_eq!(err.to_string(), "Error: Unexpected internal state");
    /// ```
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Create a timeout error indicating the operation exceeded the time limit.
    ///
    /// # Example
    ///
    /// ```rust
    /// use open_agent::Error;
    ///
    /// let err = Error::timeout();
    /// assert_eq!(err.to_string(), "Request timeout");
    /// ```
    pub fn timeout() -> Self {
        Error::Timeout
    }

    /// Create a hook-failure error carrying the hook-supplied reason.
    ///
    /// # Example
    ///
    /// ```rust
    /// use open_agent::Error;
    ///
    /// let err = Error::hook("blocked by policy");
    /// assert_eq!(err.to_string(), "Hook failed the operation: blocked by policy");
    /// ```
    pub fn hook(msg: impl Into<String>) -> Self {
        Error::Hook(msg.into())
    }
}

// ============================================================================
// TESTS
// ============================================================================
