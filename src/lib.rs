/*!

FidoNet mailer-endpoint prober: dials a host on a BinkP (FTS-1026) or
EMSI/IFCICO (FSC-0056/FSC-0088) port, drives just enough of the
handshake to identify the remote system, and reduces the outcome to a
structured [`result::TestResult`] — never a file transfer, never a mail
exchange.

Both protocol engines (`binkp`, `emsi`) are transport-agnostic: they run
over anything implementing [`transport::Transport`], so the same code
drives a live `TcpStream` in production and an in-memory
[`transport::testing::MockDuplex`] in tests. [`tester`] is the only
module that touches a socket.

*/

pub mod address;
pub mod binkp;
pub mod config;
pub mod crc16;
pub mod domain;
pub mod emsi;
mod error;
pub mod logging;
pub mod result;
pub mod tester;
pub mod transport;

pub use error::{Error, Result};
