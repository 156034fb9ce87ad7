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

use std::borrow::Cow;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::SmtpClient;

/// A message ready for submission: SMTP envelope plus rendered payload.
#[derive(Debug, Default, Clone)]
pub struct Message<'x> {
    pub mail_from: Address<'x>,
    pub rcpt_to: Vec<Address<'x>>,
    pub body: Cow<'x, [u8]>,
}

#[derive(Debug, Default, Clone)]
pub struct Address<'x> {
    pub email: Cow<'x, str>,
}

impl<T: AsyncRead + AsyncWrite + Unpin> SmtpClient<T> {
    /// Sends a message to the server.
    pub async fn send(&mut self, message: &Message<'_>) -> crate::Result<()> {
        if message.mail_from.email.trim().is_empty() {
            return Err(crate::Error::MissingMailFrom);
        }
        if message.rcpt_to.is_empty() {
            return Err(crate::Error::MissingRcptTo);
        }

        // Send mail-from
        self.mail_from(message.mail_from.email.as_ref()).await?;

        // Send rcpt-to
        for rcpt in &message.rcpt_to {
            self.rcpt_to(rcpt.email.as_ref()).await?;
        }

        // Send message
        self.data(message.body.as_ref()).await
    }
}

impl<'x> Message<'x> {
    /// Create a new message
    pub fn new<T, U, V>(from: T, to: U, body: V) -> Self
    where
        T: Into<Address<'x>>,
        U: IntoIterator<Item = T>,
        V: Into<Cow<'x, [u8]>>,
    {
        Message {
            mail_from: from.into(),
            rcpt_to: to.into_iter().map(Into::into).collect(),
            body: body.into(),
        }
    }
}

impl<'x> From<&'x str> for Address<'x> {
    fn from(email: &'x str) -> Self {
        Address {
            email: email.into(),
        }
    }
}

impl<'x> From<String> for Address<'x> {
    fn from(email: String) -> Self {
        Address {
            email: email.into(),
        }
    }
}
