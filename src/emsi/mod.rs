//! EMSI/IFCICO handshake protocol (spec §3–§4, FSC-0056/FSC-0088): a
//! character-streamed handshake built from a small stack of composable
//! pieces — packet codec, banner extractor, character reader, token
//! recognizer, DAT framing, and the state machine that drives them.

pub mod banner;
pub mod dat;
pub mod handshake;
pub mod packet;
pub mod reader;
pub mod token;

pub use handshake::{run_handshake, validate_address, LocalIdentity};
pub use packet::EmsiData;
