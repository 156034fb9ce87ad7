/*
 * Copyright Stalwart Labs Ltd.
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

//! Scripted in-process SMTP relay used by the test suites.

use std::sync::{Arc, Mutex};

use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{tcp::OwnedWriteHalf, TcpListener, TcpStream},
};

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct RelayBehavior {
    /// Mechanisms advertised in the AUTH capability.
    pub auth: Option<&'static str>,
    pub reject_auth: bool,
    pub reject_rcpt: Option<&'static str>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Transcript {
    pub commands: Vec<String>,
    pub messages: Vec<String>,
}

pub(crate) struct FakeRelay {
    port: u16,
    transcripts: Arc<Mutex<Vec<Transcript>>>,
}

impl FakeRelay {
    pub async fn start(behavior: RelayBehavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let transcripts = Arc::new(Mutex::new(Vec::new()));

        let sessions = transcripts.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve(stream, behavior, sessions.clone()));
            }
        });

        FakeRelay { port, transcripts }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Transcripts of the sessions that ended, in completion order.
    pub fn transcripts(&self) -> Vec<Transcript> {
        self.transcripts.lock().unwrap().clone()
    }
}

async fn serve(
    stream: TcpStream,
    behavior: RelayBehavior,
    transcripts: Arc<Mutex<Vec<Transcript>>>,
) {
    let (read, mut write) = stream.into_split();
    let mut reader = BufReader::new(read);
    let mut transcript = Transcript::default();
    let mut line = String::new();

    reply(&mut write, "220 fake.relay ESMTP ready\r\n").await;

    loop {
        line.clear();
        if reader.read_line(&mut line).await.unwrap_or(0) == 0 {
            break;
        }
        let command = line.trim_end().to_string();
        let verb = command.to_ascii_uppercase();
        transcript.commands.push(command.clone());

        if verb.starts_with("EHLO") {
            let auth = behavior
                .auth
                .map(|mechanisms| format!("250-AUTH {mechanisms}\r\n"))
                .unwrap_or_default();
            reply(
                &mut write,
                &format!("250-fake.relay\r\n{auth}250 8BITMIME\r\n"),
            )
            .await;
        } else if verb.starts_with("AUTH PLAIN") {
            if behavior.reject_auth {
                reply(&mut write, "535 5.7.8 Authentication credentials invalid\r\n").await;
            } else {
                reply(&mut write, "235 2.7.0 Authentication successful\r\n").await;
            }
        } else if verb.starts_with("AUTH LOGIN") {
            for prompt in ["334 VXNlcm5hbWU6\r\n", "334 UGFzc3dvcmQ6\r\n"] {
                reply(&mut write, prompt).await;
                line.clear();
                if reader.read_line(&mut line).await.unwrap_or(0) == 0 {
                    break;
                }
                transcript.commands.push(line.trim_end().to_string());
            }
            if behavior.reject_auth {
                reply(&mut write, "535 5.7.8 Authentication credentials invalid\r\n").await;
            } else {
                reply(&mut write, "235 2.7.0 Authentication successful\r\n").await;
            }
        } else if verb.starts_with("MAIL FROM") {
            reply(&mut write, "250 2.1.0 Ok\r\n").await;
        } else if verb.starts_with("RCPT TO") {
            if behavior
                .reject_rcpt
                .is_some_and(|rcpt| command.contains(&format!("<{rcpt}>")))
            {
                reply(&mut write, "550 5.1.1 No such user\r\n").await;
            } else {
                reply(&mut write, "250 2.1.5 Ok\r\n").await;
            }
        } else if verb == "DATA" {
            reply(&mut write, "354 End data with <CR><LF>.<CR><LF>\r\n").await;
            let mut message = String::new();
            loop {
                line.clear();
                if reader.read_line(&mut line).await.unwrap_or(0) == 0 || line == ".\r\n" {
                    break;
                }
                message.push_str(&line);
            }
            transcript.messages.push(message);
            reply(&mut write, "250 2.0.0 Ok: queued\r\n").await;
        } else if verb == "QUIT" {
            // Recorded before the client can see the reply
            transcripts.lock().unwrap().push(std::mem::take(&mut transcript));
            reply(&mut write, "221 2.0.0 Bye\r\n").await;
            return;
        } else {
            reply(&mut write, "502 5.5.2 Command not recognized\r\n").await;
        }
    }

    transcripts.lock().unwrap().push(transcript);
}

async fn reply(write: &mut OwnedWriteHalf, text: &str) {
    let _ = write.write_all(text.as_bytes()).await;
}
