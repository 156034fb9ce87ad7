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

//! Message composition.
//!
//! A [`MessageTemplate`] holds everything copies have in common. Each copy is
//! rendered with its own index so that placeholders in the headers, the body
//! and the envelope can differ between copies.

pub mod attachment;

use std::path::PathBuf;

use mail_builder::{
    headers::text::Text,
    mime::{BodyPart, MimePart},
    MessageBuilder,
};

use crate::{placeholder::substitute, smtp::message::Message, Error};

pub use attachment::{Attachment, AttachmentError};

/// Headers generated from the envelope or the MIME structure.
const RESERVED_HEADERS: [&str; 5] = [
    "From",
    "To",
    "Content-Type",
    "Content-Transfer-Encoding",
    "MIME-Version",
];

/// Where the text body of a message comes from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum BodySource {
    Inline(String),
    File(PathBuf),
    #[default]
    None,
}

/// Shape of a composed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// A single `text/plain` part.
    Text,
    /// A single part holding the only attachment.
    Attachment,
    /// `multipart/mixed`: the body first, if any, then every attachment.
    Multipart { parts: usize },
}

impl MessageKind {
    pub fn classify(body: &BodySource, attachments: usize) -> Self {
        let has_body = !matches!(body, BodySource::None);
        match (has_body, attachments) {
            (_, 0) => MessageKind::Text,
            (false, 1) => MessageKind::Attachment,
            (has_body, attachments) => MessageKind::Multipart {
                parts: attachments + usize::from(has_body),
            },
        }
    }
}

/// SMTP sender and recipients, possibly containing placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub mail_from: String,
    pub rcpt_to: Vec<String>,
}

impl Envelope {
    pub fn new(
        mail_from: impl Into<String>,
        rcpt_to: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Envelope {
            mail_from: mail_from.into(),
            rcpt_to: rcpt_to.into_iter().map(Into::into).collect(),
        }
    }

    /// Envelope of the copy numbered `index`.
    pub fn resolve(&self, index: usize) -> Envelope {
        Envelope {
            mail_from: substitute(&self.mail_from, index).into_owned(),
            rcpt_to: self
                .rcpt_to
                .iter()
                .map(|rcpt| substitute(rcpt, index).into_owned())
                .collect(),
        }
    }

    pub fn into_message(self, body: Vec<u8>) -> Message<'static> {
        Message::new(self.mail_from, self.rcpt_to, body)
    }
}

/// Produces the payload of each copy.
pub trait MessageSource: Send + Sync + 'static {
    /// Renders copy `index`, addressed with an already resolved `envelope`.
    fn render(&self, envelope: &Envelope, index: usize) -> crate::Result<Vec<u8>>;
}

/// Headers, body and attachments shared by all the copies of a message.
#[derive(Debug, Clone)]
pub struct MessageTemplate {
    headers: Vec<(String, String)>,
    ignored_headers: Vec<String>,
    body: Option<String>,
    attachments: Vec<Attachment>,
    kind: MessageKind,
}

impl MessageTemplate {
    /// Loads the body file and the attachments.
    ///
    /// Fails on the first file that cannot be read, before any copy is built.
    pub fn new(
        headers: Vec<(String, String)>,
        body: BodySource,
        attachments: &[PathBuf],
    ) -> crate::Result<Self> {
        let kind = MessageKind::classify(&body, attachments.len());
        let body = match body {
            BodySource::Inline(text) => Some(text),
            BodySource::File(path) => match std::fs::read(&path) {
                Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
                Err(error) => return Err(Error::DataFile { path, error }),
            },
            BodySource::None => None,
        };
        let attachments = attachments
            .iter()
            .map(Attachment::load)
            .collect::<crate::Result<Vec<_>>>()?;
        let (headers, ignored_headers) = headers.into_iter().partition::<Vec<_>, _>(|(name, _)| {
            !RESERVED_HEADERS
                .iter()
                .any(|reserved| reserved.eq_ignore_ascii_case(name))
        });

        Ok(MessageTemplate {
            headers,
            ignored_headers: ignored_headers.into_iter().map(|(name, _)| name).collect(),
            body,
            attachments,
            kind,
        })
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    /// Header names that were dropped because the builder generates them.
    pub fn ignored_headers(&self) -> &[String] {
        &self.ignored_headers
    }

    /// Builds copy `index` of the message.
    pub fn build<'x>(&'x self, envelope: &'x Envelope, index: usize) -> MessageBuilder<'x> {
        let mut builder = MessageBuilder::new()
            .from(envelope.mail_from.as_str())
            .to(envelope
                .rcpt_to
                .iter()
                .map(String::as_str)
                .collect::<Vec<_>>());

        for (name, value) in &self.headers {
            builder = builder.header(name.as_str(), Text::new(substitute(value, index)));
        }

        let body = self.body.as_deref().map(|text| substitute(text, index));
        match (body, self.attachments.as_slice()) {
            (body, []) => builder.text_body(body.unwrap_or_default()),
            (None, [attachment]) => builder.body(attachment.to_part()),
            (body, attachments) => {
                let mut parts = Vec::with_capacity(attachments.len() + 1);
                if let Some(body) = body {
                    parts.push(MimePart::new("text/plain", BodyPart::Text(body)));
                }
                parts.extend(attachments.iter().map(Attachment::to_part));
                builder.body(MimePart::new("multipart/mixed", BodyPart::Multipart(parts)))
            }
        }
    }
}

impl MessageSource for MessageTemplate {
    fn render(&self, envelope: &Envelope, index: usize) -> crate::Result<Vec<u8>> {
        Ok(self.build(envelope, index).write_to_vec()?)
    }
}

/// A complete message received from standard input, relayed as is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    contents: Vec<u8>,
}

impl RawMessage {
    /// Wraps `contents`, turning bare LF line endings into CRLF.
    pub fn new(contents: impl AsRef<[u8]>) -> Self {
        let contents = contents.as_ref();
        let mut normalized = Vec::with_capacity(contents.len() + contents.len() / 32);
        let mut last = 0u8;
        for &byte in contents {
            if byte == b'\n' && last != b'\r' {
                normalized.push(b'\r');
            }
            normalized.push(byte);
            last = byte;
        }
        RawMessage {
            contents: normalized,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.contents.iter().all(u8::is_ascii_whitespace)
    }
}

impl MessageSource for RawMessage {
    fn render(&self, _envelope: &Envelope, _index: usize) -> crate::Result<Vec<u8>> {
        Ok(self.contents.clone())
    }
}
