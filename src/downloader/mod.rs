pub mod chunk;
pub mod destination;
pub mod engine;
pub mod link;
pub mod progress;
pub mod session;

pub use chunk::{partition, Chunk, ChunkFetcher, ChunkResult};
pub use destination::{Destination, DownloadOutcome, DownloadTarget, OutputFile, RangeWriter};
pub use engine::DownloadEngine;
pub use link::{resolve_link, LINK_SENTINEL};
pub use progress::{format_size, DownloadProgress, DownloadStats};
pub use session::DownloadSession;
