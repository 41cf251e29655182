//! Logbus wire protocol.
//!
//! Defines the self-describing record model ([`Record`], [`Value`]), the
//! transport frame ([`Frame`], a frame kind plus named typed fields), and the
//! length-prefixed codec ([`FrameParser`], [`encode_frame`]).
//!
//! Wire layout of a frame:
//!
//! ```text
//! [total length: u32 big-endian, includes these 4 bytes]
//! [CBOR map; first entry is "frame" -> kind, remaining entries are fields]
//! ```
//!
//! We chose CBOR over alternatives because it's self-describing (field names
//! embedded), compact, and doesn't need code generation. The server routes on
//! the frame kind and reads only the fields it needs; event payloads pass
//! through opaquely as nested records.

mod codec;
mod errors;
mod frame;
mod record;

pub use codec::{DEFAULT_MAX_FRAME_SIZE, FrameParser, LEN_PREFIX_SIZE, encode_frame};
pub use errors::{ProtocolError, Result};
pub use frame::{Frame, fields, kind};
pub use record::{Record, Value};
