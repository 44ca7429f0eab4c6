//! Cross-context open/closed state coordination.
//!
//! All traffic runs on the `<ns>:control` broadcast topic.
//!
//! ```text
//!  host page / agents                               tool UI
//! ┌──────────────────┐  {action: toggle}        ┌──────────────────┐
//! │ DevtoolsControl  │─────────────────────────►│   StateOwner     │
//! │                  │  {action: get-state}     │                  │
//! │                  │─────────────────────────►│  SharedState     │
//! │                  │  {type: state-response}  │  { isOpen,       │
//! │                  │◄─────────────────────────│    height,       │
//! │                  │  {type: state-changed}   │    selection }   │
//! │                  │◄─────────────────────────│                  │
//! └──────────────────┘                          └──────────────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `client` | Requesting side: actions, state queries, change echoes |
//! | `owner` | Owning side: authoritative state and echoes |

// ============================================================================
// Submodules
// ============================================================================

/// Requesting side.
pub mod client;

/// Owning side.
pub mod owner;

// ============================================================================
// Re-exports
// ============================================================================

pub use client::DevtoolsControl;
pub use owner::{MAX_HEIGHT_RATIO, MIN_HEIGHT, Selection, SharedState, StateOwner, clamp_height};
