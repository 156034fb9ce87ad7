/*
 * Copyright Stalwart Labs Ltd. See the COPYING
 * file at the top-level directory of this distribution.
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

//! # mailshot
//!
//! _mailshot_ composes e-mail messages and sends one or many copies of them through an SMTP relay.
//! It includes the following features:
//!
//! - Plain text, single attachment and `multipart/mixed` messages with custom headers, generated with
//!   [`mail-builder`](https://crates.io/crates/mail-builder).
//! - Per-copy placeholders: `#id#` is replaced by the copy number and `#uuid#` by a fresh random UUID.
//! - Simple Mail Transfer Protocol (**SMTP**; _RFC 5321_) delivery.
//! - SMTP Service Extension for Secure SMTP over **TLS** (_RFC 3207_), or implicit TLS.
//! - SMTP Service Extension for Authentication (_RFC 4954_) with automatic mechanism negotiation (from most secure to least secure):
//!   - CRAM-MD5 (_RFC 2195_)
//!   - DIGEST-MD5 (_RFC 2831_; obsolete but still supported)
//!   - LOGIN
//!   - PLAIN
//! - Bounded concurrent delivery: copies are sent in sequential batches of parallel connections.
//! - Printing messages to standard output instead of sending them.
//!
//! ## Usage Example
//!
//! Send five numbered copies of a message with two attachments, two connections at a time:
//!
//! ```bash
//!  $ mailshot smtp.example.com:587 --tls --user john --pwd p4ssw0rd \
//!        --mail-from john@example.com --rcpt-to jane@example.com \
//!        --header "Subject=Report #id#" --data "See attached." \
//!        --attachment-path report.pdf chart.png \
//!        --count 5 --concurrency 2
//! ```
//!
//! Relay a pre-formed message read from standard input:
//!
//! ```bash
//!  $ cat message.eml | mailshot localhost:2525 --mail-from a@example.com --rcpt-to b@example.com
//! ```
//!
//! ## License
//!
//! Licensed under either of
//!
//!  * Apache License, Version 2.0 ([LICENSE-APACHE](LICENSE-APACHE) or <http://www.apache.org/licenses/LICENSE-2.0>)
//!  * MIT license ([LICENSE-MIT](LICENSE-MIT) or <http://opensource.org/licenses/MIT>)
//!
//! at your option.
//!

pub mod cli;
pub mod compose;
pub mod diagnostics;
pub mod dispatch;
pub mod input;
pub mod placeholder;
pub mod smtp;
pub mod transport;

use std::{fmt::Display, path::PathBuf, time::Duration};

use smtp::{auth::Credentials, stream::SmtpStream};
use smtp_proto::Response;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::TlsConnector;

#[derive(Debug)]
pub enum Error {
    /// I/O error
    Io(std::io::Error),

    /// TLS error
    Tls(Box<rustls::Error>),

    /// Base64 decode error
    Base64(base64::DecodeError),

    // SMTP authentication error.
    Auth(smtp::auth::Error),

    /// Failure parsing SMTP reply
    UnparseableReply,

    /// Unexpected SMTP reply.
    UnexpectedReply(Response<String>),

    /// SMTP authentication failure.
    AuthenticationFailed(Response<String>),

    /// Invalid TLS name provided.
    InvalidTLSName,

    /// Missing message sender.
    MissingMailFrom,

    /// Missing message recipients.
    MissingRcptTo,

    /// The server does no support any of the available authentication methods.
    UnsupportedAuthMechanism,

    /// Connection timeout.
    Timeout,

    /// STARTTLS not available
    MissingStartTls,

    /// An attachment could not be loaded.
    Attachment {
        path: PathBuf,
        reason: compose::AttachmentError,
    },

    /// The message body file could not be read.
    DataFile {
        path: PathBuf,
        error: std::io::Error,
    },

    /// A single copy could not be delivered.
    Delivery { index: usize, error: Box<Error> },

    /// One or more copies of a concurrent batch failed.
    BatchFailed { batch: usize, failures: Vec<Error> },

    /// A delivery worker panicked or was aborted.
    WorkerPanicked,

    /// The message piped on standard input could not be read.
    Stdin(std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// SMTP client builder
#[derive(Clone)]
pub struct SmtpClientBuilder<T: AsRef<str>> {
    pub timeout: Duration,
    pub tls_connector: TlsConnector,
    pub tls_hostname: T,
    pub tls: TlsMode,
    pub credentials: Option<Credentials<T>>,
    pub addr: String,
    pub local_host: String,
}

/// How the connection to the relay is secured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TlsMode {
    /// Clear text for the whole session.
    #[default]
    None,
    /// Upgrade the connection with STARTTLS after the first EHLO.
    StartTls,
    /// Start the TLS handshake as soon as the TCP connection is established.
    Implicit,
}

/// SMTP client
pub struct SmtpClient<T: AsyncRead + AsyncWrite = SmtpStream> {
    pub stream: T,
    pub timeout: Duration,
}

impl Error {
    /// Whether the error was raised while loading attachments or the body file.
    pub fn is_attachment(&self) -> bool {
        match self {
            Error::Attachment { .. } | Error::DataFile { .. } => true,
            Error::Delivery { error, .. } => error.is_attachment(),
            Error::BatchFailed { failures, .. } => failures.iter().any(Error::is_attachment),
            _ => false,
        }
    }

    /// Whether the error was raised while talking to the relay.
    pub fn is_sending(&self) -> bool {
        match self {
            Error::Delivery { error, .. } => error.is_sending(),
            Error::BatchFailed { failures, .. } => failures.iter().any(Error::is_sending),
            Error::Attachment { .. }
            | Error::DataFile { .. }
            | Error::WorkerPanicked
            | Error::Stdin(_) => false,
            _ => true,
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::Tls(err) => Some(err.as_ref()),
            Error::Base64(err) => Some(err),
            Error::DataFile { error, .. } => Some(error),
            Error::Stdin(err) => Some(err),
            Error::Delivery { error, .. } => Some(error.as_ref()),
            _ => None,
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {e}"),
            Error::Tls(e) => write!(f, "TLS error: {e}"),
            Error::Base64(e) => write!(f, "Base64 decode error: {e}"),
            Error::Auth(e) => write!(f, "SMTP authentication error: {e}"),
            Error::UnparseableReply => write!(f, "Unparseable SMTP reply"),
            Error::UnexpectedReply(e) => {
                write!(f, "Unexpected reply: {} {}", e.code(), e.message())
            }
            Error::AuthenticationFailed(e) => {
                write!(f, "Authentication failed: {} {}", e.code(), e.message())
            }
            Error::InvalidTLSName => write!(f, "Invalid TLS name provided"),
            Error::MissingMailFrom => write!(f, "Missing message sender"),
            Error::MissingRcptTo => write!(f, "Missing message recipients"),
            Error::UnsupportedAuthMechanism => write!(
                f,
                "The server does no support any of the available authentication methods"
            ),
            Error::Timeout => write!(f, "Connection timeout"),
            Error::MissingStartTls => write!(f, "STARTTLS extension unavailable"),
            Error::Attachment { path, reason } => {
                write!(f, "Attachment {} cannot be attached: {reason}", path.display())
            }
            Error::DataFile { path, error } => {
                write!(f, "Data file {} cannot be read: {error}", path.display())
            }
            Error::Delivery { index, error } => write!(f, "Copy #{index} failed: {error}"),
            Error::BatchFailed { batch, failures } => {
                write!(f, "{} copies of batch {batch} failed", failures.len())?;
                if let Some(first) = failures.first() {
                    write!(f, " (first: {first})")?;
                }
                Ok(())
            }
            Error::WorkerPanicked => write!(f, "Delivery worker terminated abnormally"),
            Error::Stdin(e) => write!(f, "Standard input cannot be read: {e}"),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<base64::DecodeError> for Error {
    fn from(err: base64::DecodeError) -> Self {
        Error::Base64(err)
    }
}

impl From<smtp::auth::Error> for Error {
    fn from(err: smtp::auth::Error) -> Self {
        Error::Auth(err)
    }
}
