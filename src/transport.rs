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

//! Where copies go once rendered: an SMTP relay or standard output.

use std::{
    io::Write,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;

use crate::{
    smtp::{message::Message, stream::SmtpStream},
    SmtpClient, SmtpClientBuilder,
};

/// Opens sessions. Shared read-only by every delivery worker.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    type Session: Session;

    /// Connects and, when configured, secures and authenticates the session.
    async fn open(&self) -> crate::Result<Self::Session>;
}

/// A single connection, owned by one worker at a time.
#[async_trait]
pub trait Session: Send + 'static {
    async fn deliver(&mut self, message: &Message<'_>) -> crate::Result<()>;

    async fn close(&mut self) -> crate::Result<()>;
}

#[async_trait]
impl Transport for SmtpClientBuilder<String> {
    type Session = SmtpClient<SmtpStream>;

    async fn open(&self) -> crate::Result<Self::Session> {
        self.connect().await
    }
}

#[async_trait]
impl Session for SmtpClient<SmtpStream> {
    async fn deliver(&mut self, message: &Message<'_>) -> crate::Result<()> {
        self.send(message).await
    }

    async fn close(&mut self) -> crate::Result<()> {
        self.quit().await
    }
}

type SharedWriter = Arc<Mutex<dyn Write + Send>>;

/// Prints every copy instead of sending it.
#[derive(Clone)]
pub struct StdoutTransport {
    out: SharedWriter,
}

pub struct StdoutSession {
    out: SharedWriter,
}

impl StdoutTransport {
    pub fn new() -> Self {
        StdoutTransport::with_writer(std::io::stdout())
    }

    /// Prints to `writer` rather than standard output.
    pub fn with_writer(writer: impl Write + Send + 'static) -> Self {
        StdoutTransport {
            out: Arc::new(Mutex::new(writer)),
        }
    }
}

impl Default for StdoutTransport {
    fn default() -> Self {
        StdoutTransport::new()
    }
}

#[async_trait]
impl Transport for StdoutTransport {
    type Session = StdoutSession;

    async fn open(&self) -> crate::Result<Self::Session> {
        Ok(StdoutSession {
            out: self.out.clone(),
        })
    }
}

#[async_trait]
impl Session for StdoutSession {
    async fn deliver(&mut self, message: &Message<'_>) -> crate::Result<()> {
        // A poisoned lock only means another copy failed mid-write
        let mut out = self.out.lock().unwrap_or_else(|err| err.into_inner());
        out.write_all(&message.body)?;
        if !message.body.ends_with(b"\n") {
            out.write_all(b"\r\n")?;
        }
        out.write_all(b"\r\n")?;
        out.flush()?;
        Ok(())
    }

    async fn close(&mut self) -> crate::Result<()> {
        Ok(())
    }
}
