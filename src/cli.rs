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

//! Command line arguments.

use std::{fmt::Display, path::PathBuf, time::Duration};

use clap::{ArgAction, Parser};

use crate::{
    compose::{BodySource, Envelope, MessageTemplate},
    dispatch::Job,
    SmtpClientBuilder, TlsMode,
};

pub const DEFAULT_PORT: u16 = 25;

#[derive(Debug, Clone, Parser)]
#[command(
    name = "mailshot",
    version,
    about = "Compose e-mail messages and send one or many copies through an SMTP relay"
)]
pub struct Args {
    /// Relay address as host[:port]
    #[arg(value_parser = parse_relay)]
    pub relay: Relay,

    /// Envelope sender, also used as the From header
    #[arg(long, alias = "mail_from")]
    pub mail_from: String,

    /// Envelope recipients, also used as the To header
    #[arg(long, alias = "rcpt_to", num_args = 1.., required = true)]
    pub rcpt_to: Vec<String>,

    /// Upgrade the connection with STARTTLS
    #[arg(long, conflicts_with = "implicit_tls")]
    pub tls: bool,

    /// Connect with TLS from the start
    #[arg(long)]
    pub implicit_tls: bool,

    /// Accept any TLS certificate
    #[arg(long)]
    pub allow_invalid_certs: bool,

    /// Authenticate as this user
    #[arg(long, requires = "pwd")]
    pub user: Option<String>,

    /// Password of the user
    #[arg(long, env = "MAILSHOT_PWD", hide_env_values = true)]
    pub pwd: Option<String>,

    /// Message headers as name=value
    #[arg(long = "header", alias = "headers", num_args = 1.., value_parser = parse_header)]
    pub headers: Vec<(String, String)>,

    /// Message body
    #[arg(long)]
    pub data: Option<String>,

    /// Read the message body from a file, preferred over --data
    #[arg(long, alias = "data_file")]
    pub data_file: Option<PathBuf>,

    /// Number of copies to send
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    pub count: u32,

    /// Number of copies sent at the same time
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    pub concurrency: u32,

    /// Print the messages instead of sending them
    #[arg(long, alias = "send_stdout")]
    pub stdout: bool,

    /// Files attached to the message
    #[arg(long, alias = "attachment_path", num_args = 1..)]
    pub attachment_path: Vec<PathBuf>,

    /// Connection and command timeout, in seconds
    #[arg(long, default_value_t = 60)]
    pub timeout: u64,

    /// Host name announced with EHLO [default: local host name]
    #[arg(long)]
    pub helo: Option<String>,

    /// Append log records to this file instead of standard error
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Log more (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Milliseconds to wait for a message piped on standard input
    #[arg(long, default_value_t = 1000)]
    pub stdin_wait: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relay {
    pub host: String,
    pub port: u16,
}

/// Parses `host[:port]`. IPv6 addresses with a port go in brackets.
pub fn parse_relay(value: &str) -> Result<Relay, String> {
    let (host, port) = match value.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') || host.ends_with(']') => (
            host,
            port.parse::<u16>()
                .map_err(|_| format!("{port:?} is not a valid port"))?,
        ),
        _ => (value, DEFAULT_PORT),
    };
    let host = host.trim_start_matches('[').trim_end_matches(']');

    if host.is_empty() {
        Err("missing relay host".to_string())
    } else {
        Ok(Relay {
            host: host.to_string(),
            port,
        })
    }
}

/// Parses `name=value`. The value may itself contain `=`.
pub fn parse_header(value: &str) -> Result<(String, String), String> {
    match value.split_once('=') {
        Some((name, value))
            if !name.is_empty()
                && name
                    .bytes()
                    .all(|ch| ch.is_ascii_graphic() && ch != b':') =>
        {
            Ok((name.to_string(), value.trim().to_string()))
        }
        _ => Err(format!(
            "{value:?} is not an appropriate header (name=value)"
        )),
    }
}

impl Args {
    pub fn body_source(&self) -> BodySource {
        match (&self.data_file, &self.data) {
            (Some(path), _) => BodySource::File(path.clone()),
            (None, Some(text)) => BodySource::Inline(text.clone()),
            (None, None) => BodySource::None,
        }
    }

    /// Whether options that only apply to composed messages were given.
    pub fn has_composition_options(&self) -> bool {
        !self.headers.is_empty()
            || self.data.is_some()
            || self.data_file.is_some()
            || !self.attachment_path.is_empty()
    }

    pub fn envelope(&self) -> Envelope {
        Envelope::new(self.mail_from.clone(), self.rcpt_to.iter().cloned())
    }

    /// Loads the body file and the attachments.
    pub fn template(&self) -> crate::Result<MessageTemplate> {
        MessageTemplate::new(
            self.headers.clone(),
            self.body_source(),
            &self.attachment_path,
        )
    }

    pub fn job(&self) -> Job {
        Job::new(self.count as usize, self.concurrency as usize)
    }

    pub fn tls_mode(&self) -> TlsMode {
        if self.implicit_tls {
            TlsMode::Implicit
        } else if self.tls {
            TlsMode::StartTls
        } else {
            TlsMode::None
        }
    }

    pub fn smtp_client(&self) -> SmtpClientBuilder<String> {
        let mut client = SmtpClientBuilder::new(self.relay.host.clone(), self.relay.port)
            .tls(self.tls_mode())
            .timeout(Duration::from_secs(self.timeout));
        if self.allow_invalid_certs {
            client = client.allow_invalid_certs();
        }
        if let (Some(user), Some(pwd)) = (&self.user, &self.pwd) {
            client = client.credentials((user.clone(), pwd.clone()));
        }
        if let Some(helo) = &self.helo {
            client = client.helo_host(helo);
        }
        client
    }
}

impl Display for Relay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

#[cfg(test)]
mod test {
    use std::path::PathBuf;

    use clap::{error::ErrorKind, CommandFactory, Parser};

    use crate::{compose::BodySource, TlsMode};

    use super::{parse_header, parse_relay, Args, Relay};

    fn required() -> Vec<&'static str> {
        vec![
            "mailshot",
            "smtp_gmail.com:587",
            "--mail_from",
            "foo@mail.net",
            "--rcpt_to",
            "bar@mail.net",
        ]
    }

    #[test]
    fn command_is_well_formed() {
        Args::command().debug_assert();
    }

    #[test]
    fn default_values() {
        let args = Args::try_parse_from(required()).unwrap();

        assert_eq!(
            args.relay,
            Relay {
                host: "smtp_gmail.com".to_string(),
                port: 587
            }
        );
        assert_eq!(args.mail_from, "foo@mail.net");
        assert_eq!(args.rcpt_to, vec!["bar@mail.net"]);
        assert!(!args.tls);
        assert!(!args.implicit_tls);
        assert_eq!(args.data_file, None);
        assert!(args.attachment_path.is_empty());
        assert_eq!(args.count, 1);
        assert!(!args.stdout);
        assert!(args.headers.is_empty());
        assert_eq!(args.user, None);
        assert_eq!(args.concurrency, 1);
        assert_eq!(args.data, None);
        assert_eq!(args.timeout, 60);
        assert_eq!(args.verbose, 0);
        assert_eq!(args.stdin_wait, 1000);
        assert_eq!(args.tls_mode(), TlsMode::None);
        assert_eq!(args.body_source(), BodySource::None);
        assert!(!args.has_composition_options());
    }

    #[test]
    fn all_values() {
        let args = Args::try_parse_from([
            "mailshot",
            "smtp_gmail.com:587",
            "--mail_from",
            "foo@mail.net",
            "--rcpt_to",
            "bar@mail.net",
            "baz@mail.net",
            "--tls",
            "--data_file",
            "/tmp/text.txt",
            "--attachment_path",
            "1",
            "2",
            "--count",
            "2",
            "--send_stdout",
            "--header",
            "Content-type=text/plain",
            "Subject=Hello",
            "--pwd",
            "123",
            "--user",
            "Alexandra Kozhemiakina",
            "--concurrency",
            "5",
            "--data",
            "Hello!Parsing is working!",
            "-vv",
        ])
        .unwrap();

        assert_eq!(args.rcpt_to, vec!["bar@mail.net", "baz@mail.net"]);
        assert!(args.tls);
        assert_eq!(args.data_file, Some(PathBuf::from("/tmp/text.txt")));
        assert_eq!(
            args.attachment_path,
            vec![PathBuf::from("1"), PathBuf::from("2")]
        );
        assert_eq!(args.count, 2);
        assert!(args.stdout);
        assert_eq!(
            args.headers,
            vec![
                ("Content-type".to_string(), "text/plain".to_string()),
                ("Subject".to_string(), "Hello".to_string())
            ]
        );
        assert_eq!(args.pwd.as_deref(), Some("123"));
        assert_eq!(args.user.as_deref(), Some("Alexandra Kozhemiakina"));
        assert_eq!(args.concurrency, 5);
        assert_eq!(args.data.as_deref(), Some("Hello!Parsing is working!"));
        assert_eq!(args.verbose, 2);
        assert!(args.has_composition_options());

        // The body file wins over the inline body
        assert_eq!(
            args.body_source(),
            BodySource::File(PathBuf::from("/tmp/text.txt"))
        );
        // Concurrency never exceeds the number of copies
        assert_eq!(args.job().concurrency(), 2);
        assert_eq!(args.tls_mode(), TlsMode::StartTls);
    }

    #[test]
    fn dashed_spellings() {
        let args = Args::try_parse_from([
            "mailshot",
            "localhost",
            "--mail-from",
            "foo@mail.net",
            "--rcpt-to",
            "bar@mail.net",
            "--data-file",
            "body.txt",
            "--attachment-path",
            "a.pdf",
            "--stdout",
            "--implicit-tls",
            "--headers",
            "X-Mailer=mailshot",
        ])
        .unwrap();

        assert_eq!(args.relay.port, 25);
        assert_eq!(args.data_file, Some(PathBuf::from("body.txt")));
        assert_eq!(args.attachment_path, vec![PathBuf::from("a.pdf")]);
        assert!(args.stdout);
        assert_eq!(args.tls_mode(), TlsMode::Implicit);
        assert_eq!(
            args.headers,
            vec![("X-Mailer".to_string(), "mailshot".to_string())]
        );
    }

    #[test]
    fn missing_positional_argument() {
        let err = Args::try_parse_from([
            "mailshot",
            "--mail_from",
            "foo@mail.net",
            "--rcpt_to",
            "bar@mail.net",
        ])
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn invalid_arguments() {
        for extra in [
            &["--count", "0"][..],
            &["--concurrency", "0"],
            &["--header", "no-separator"],
            &["--user", "john"],
            &["--tls", "--implicit-tls"],
        ] {
            let mut argv = required();
            argv.extend_from_slice(extra);
            assert!(Args::try_parse_from(argv).is_err(), "{extra:?} was accepted");
        }

        let mut argv = required();
        argv[1] = "relay.example.com:smtp";
        assert!(Args::try_parse_from(argv).is_err());
    }

    #[test]
    fn relay_addresses() {
        for (value, host, port) in [
            ("mail.example.com", "mail.example.com", 25),
            ("mail.example.com:2525", "mail.example.com", 2525),
            ("127.0.0.1:587", "127.0.0.1", 587),
            ("[::1]:465", "::1", 465),
            ("::1", "::1", 25),
        ] {
            assert_eq!(
                parse_relay(value),
                Ok(Relay {
                    host: host.to_string(),
                    port
                }),
                "{value}"
            );
        }
        assert!(parse_relay(":25").is_err());
        assert_eq!(parse_relay("[::1]:465").unwrap().to_string(), "[::1]:465");
    }

    #[test]
    fn header_pairs() {
        assert_eq!(
            parse_header("Subject=Hello there"),
            Ok(("Subject".to_string(), "Hello there".to_string()))
        );
        assert_eq!(
            parse_header("X-Query=a=b"),
            Ok(("X-Query".to_string(), "a=b".to_string()))
        );
        assert_eq!(
            parse_header("X-Empty="),
            Ok(("X-Empty".to_string(), String::new()))
        );
        assert!(parse_header("=value").is_err());
        assert!(parse_header("Bad Name=value").is_err());
        assert!(parse_header("Bad:Name=value").is_err());
    }
}
