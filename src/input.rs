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

//! Detection of a complete message piped on standard input.

use std::{
    io::{self, IsTerminal, Read},
    time::Duration,
};

use tokio::sync::mpsc;

use crate::{compose::RawMessage, Error};

/// The message piped on standard input, if any.
///
/// An interactive terminal is never read.
pub async fn piped_stdin(wait: Duration) -> crate::Result<Option<RawMessage>> {
    let stdin = io::stdin();
    if stdin.is_terminal() {
        Ok(None)
    } else {
        read_piped(stdin, wait).await
    }
}

/// Reads a message from `reader` once it is ready.
///
/// Returns `None` when nothing arrives within `wait`, or when the input ends
/// holding nothing but whitespace. Once the first bytes have arrived the
/// input is read to its end.
pub async fn read_piped<R: Read + Send + 'static>(
    reader: R,
    wait: Duration,
) -> crate::Result<Option<RawMessage>> {
    let mut chunks = spawn_reader(reader).map_err(Error::Stdin)?;

    let mut contents = match tokio::time::timeout(wait, chunks.recv()).await {
        Ok(Some(chunk)) => chunk.map_err(Error::Stdin)?,
        Ok(None) | Err(_) => return Ok(None),
    };
    while let Some(chunk) = chunks.recv().await {
        contents.extend_from_slice(&chunk.map_err(Error::Stdin)?);
    }

    let message = RawMessage::new(contents);
    Ok((!message.is_empty()).then_some(message))
}

/// Blocking reads cannot be cancelled, so they run on their own thread,
/// which is left behind if the input never becomes ready.
fn spawn_reader<R: Read + Send + 'static>(
    mut reader: R,
) -> io::Result<mpsc::UnboundedReceiver<io::Result<Vec<u8>>>> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::Builder::new()
        .name("stdin".to_string())
        .spawn(move || {
            let mut buf = vec![0u8; 8192];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(br) => {
                        if tx.send(Ok(buf[..br].to_vec())).is_err() {
                            break;
                        }
                    }
                    Err(err) if err.kind() == io::ErrorKind::Interrupted => (),
                    Err(err) => {
                        let _ = tx.send(Err(err));
                        break;
                    }
                }
            }
        })?;
    Ok(rx)
}

#[cfg(test)]
mod test {
    use std::{
        io::{self, Cursor, Read},
        time::{Duration, Instant},
    };

    use crate::{compose::RawMessage, Error};

    use super::read_piped;

    /// Blocks like a pipe whose writer never writes.
    struct Idle;

    impl Read for Idle {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            std::thread::sleep(Duration::from_secs(10));
            Ok(0)
        }
    }

    /// Delivers `contents` in one chunk after `delay`.
    struct Late {
        delay: Duration,
        contents: Option<&'static [u8]>,
    }

    impl Read for Late {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.contents.take() {
                Some(contents) => {
                    std::thread::sleep(self.delay);
                    buf[..contents.len()].copy_from_slice(contents);
                    Ok(contents.len())
                }
                None => Ok(0),
            }
        }
    }

    struct Broken;

    impl Read for Broken {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::Other, "pipe broke"))
        }
    }

    #[tokio::test]
    async fn piped_message() {
        let message = read_piped(
            Cursor::new(b"Subject: Hi\n\nHello\n".to_vec()),
            Duration::from_secs(1),
        )
        .await
        .unwrap();
        assert_eq!(message, Some(RawMessage::new("Subject: Hi\r\n\r\nHello\r\n")));
    }

    #[tokio::test]
    async fn empty_input_is_ignored() {
        for contents in [&b""[..], b"\n \r\n"] {
            assert_eq!(
                read_piped(Cursor::new(contents), Duration::from_secs(1))
                    .await
                    .unwrap(),
                None
            );
        }
    }

    #[tokio::test]
    async fn idle_input_is_not_awaited() {
        let started = Instant::now();
        assert_eq!(
            read_piped(Idle, Duration::from_millis(50)).await.unwrap(),
            None
        );
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn slow_writer_within_wait() {
        let message = read_piped(
            Late {
                delay: Duration::from_millis(50),
                contents: Some(b"Subject: Late\r\n\r\nbody\r\n"),
            },
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        assert_eq!(message, Some(RawMessage::new("Subject: Late\r\n\r\nbody\r\n")));
    }

    #[tokio::test]
    async fn read_failure_is_an_input_error() {
        let err = read_piped(Broken, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, Error::Stdin(_)));
        assert!(!err.is_sending());
        assert!(!err.is_attachment());
    }
}
