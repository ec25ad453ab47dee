//! Choreo Core Library
//!
//! Formation choreography engine: performers placed on a stage across
//! keyframes, playback between them, undo history, and collaborative editing
//! over a CRDT.

pub mod collaboration;
pub mod config;
pub mod crdt;
pub mod export;
pub mod formation;
pub mod geometry;
pub mod history;
pub mod playback;
pub mod presence;
pub mod session;
pub mod storage;
pub mod store;
pub mod sync;

pub use collaboration::{CollabError, FormationReplica};
pub use config::{ConfigError, EditorConfig};
pub use crdt::{CrdtFormation, FormationOp, UndoSettings};
pub use export::{ExportError, ExportFormat, ExportOptions, export_formation};
pub use formation::{
    AudioTrack, Formation, FormationId, FormationMeta, Keyframe, KeyframeId, MetaUpdate,
    Performer, PerformerId, PerformerUpdate, Position, PositionMap, Transition,
};
pub use history::{HistoryManager, HistorySnapshot, HistoryStrategy};
pub use playback::{PlaybackEngine, PlaybackState, PlaybackStatus, positions_at_time};
pub use presence::{DragStatus, PresenceManager};
pub use session::{DragStart, EditorSession};
pub use store::FormationStore;
pub use sync::{ConnectionState, MemoryRelay, MemoryTransport, SyncEvent, Transport};
