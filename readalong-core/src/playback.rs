use crate::unit::TextUnit;
use std::fmt;
use tokio::time::Instant;

/// Lifecycle of a single narration session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Acquiring,
    Playing,
    Completed,
    Cancelled,
    Failed,
}

impl SessionState {
    /// Completed, Cancelled and Failed end a session for good
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }

    /// Whether the session still owns the output channel
    #[must_use]
    pub const fn is_live(self) -> bool {
        matches!(self, Self::Acquiring | Self::Playing)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Acquiring => "acquiring",
            Self::Playing => "playing",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Monotonic session identifier; a higher id always supersedes a lower one
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SessionId(pub u64);

impl SessionId {
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Point-in-time view of the current narration session
#[derive(Debug, Clone)]
pub struct PlaybackSession {
    pub id: SessionId,
    pub state: SessionState,
    /// Unit being narrated (None before the first play request)
    pub unit: Option<TextUnit>,
    /// Highlighted word index, None when nothing is highlighted
    pub highlight: Option<usize>,
    /// When the underlying playback started
    pub started_at: Option<Instant>,
    pub cancellation_requested: bool,
}

impl Default for PlaybackSession {
    fn default() -> Self {
        Self {
            id: SessionId::default(),
            state: SessionState::Idle,
            unit: None,
            highlight: None,
            started_at: None,
            cancellation_requested: false,
        }
    }
}

impl PlaybackSession {
    /// Fresh session for `unit`, already past Idle
    #[must_use]
    pub fn acquiring(id: SessionId, unit: TextUnit) -> Self {
        Self {
            id,
            state: SessionState::Acquiring,
            unit: Some(unit),
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn is_live(&self) -> bool {
        self.state.is_live()
    }
}
