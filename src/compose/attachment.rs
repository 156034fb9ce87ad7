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

use std::{
    borrow::Cow,
    fmt::Display,
    io,
    path::{Path, PathBuf},
};

use mail_builder::mime::{BodyPart, MimePart};

use crate::Error;

/// A file attached to every copy of a message.
///
/// The file is read once, when the attachment is loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub path: PathBuf,
    pub file_name: String,
    pub content_type: String,
    pub contents: Vec<u8>,
}

#[derive(Debug)]
pub enum AttachmentError {
    NotFound,
    Unreadable(io::Error),
    UnknownContentType,
}

impl Attachment {
    /// Reads the file at `path` and guesses its content type from the extension.
    pub fn load(path: impl AsRef<Path>) -> crate::Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read(path).map_err(|err| Error::Attachment {
            path: path.to_path_buf(),
            reason: if err.kind() == io::ErrorKind::NotFound {
                AttachmentError::NotFound
            } else {
                AttachmentError::Unreadable(err)
            },
        })?;
        let content_type = mime_guess::from_path(path)
            .first()
            .ok_or_else(|| Error::Attachment {
                path: path.to_path_buf(),
                reason: AttachmentError::UnknownContentType,
            })?
            .essence_str()
            .to_string();
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("attachment")
            .to_string();

        Ok(Attachment {
            path: path.to_path_buf(),
            file_name,
            content_type,
            contents,
        })
    }

    /// MIME part with an `attachment` disposition carrying the file name.
    pub fn to_part(&self) -> MimePart<'_> {
        MimePart::new(
            self.content_type.as_str(),
            BodyPart::Binary(Cow::Borrowed(self.contents.as_slice())),
        )
        .attachment(self.file_name.as_str())
    }
}

impl Display for AttachmentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttachmentError::NotFound => write!(f, "file not found"),
            AttachmentError::Unreadable(err) => write!(f, "file cannot be read ({err})"),
            AttachmentError::UnknownContentType => write!(f, "content type cannot be guessed"),
        }
    }
}
