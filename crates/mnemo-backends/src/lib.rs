//! Storage media for mnemo.
//!
//! Every medium implements [`BackendAdapter`]: write a signed
//! [`MemoryRecord`](mnemo_types::MemoryRecord), read back the latest record
//! for a key. Adapters share no state with each other; the coordinator in
//! `mnemo-store` fans writes out to all of them and reads from them in a
//! fixed priority order.
//!
//! | adapter               | medium                                             |
//! |-----------------------|----------------------------------------------------|
//! | [`StructuredAdapter`] | SQLite table                                       |
//! | [`DocumentAdapter`]   | one JSON document per record                       |
//! | [`RecursiveAdapter`]  | self-hashing node chain per key, optional journal  |
//! | [`ArchiveAdapter`]    | append-only segment of compressed, framed records  |
//! | [`GlyphAdapter`]      | grayscale raster image per record                  |
//! | [`InMemoryAdapter`]   | `HashMap`, for tests and embedding                 |

pub mod archive;
pub mod document;
pub mod error;
pub mod frame;
pub mod glyph;
mod layout;
pub mod memory;
pub mod recursive;
pub mod structured;
pub mod traits;

pub use archive::ArchiveAdapter;
pub use document::DocumentAdapter;
pub use error::{BackendError, BackendResult};
pub use glyph::{Glyph, GlyphAdapter};
pub use memory::InMemoryAdapter;
pub use recursive::RecursiveAdapter;
pub use structured::StructuredAdapter;
pub use traits::BackendAdapter;
