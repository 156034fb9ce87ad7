/*
 * Copyright Stalwart Labs Ltd.
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

use std::time::Duration;

use smtp_proto::EXT_START_TLS;
use tokio::net::TcpStream;

use crate::{SmtpClient, SmtpClientBuilder, TlsMode};

use super::{auth::Credentials, stream::SmtpStream, tls::build_tls_connector, AssertReply};

impl<T: AsRef<str>> SmtpClientBuilder<T> {
    pub fn new(hostname: T, port: u16) -> Self {
        SmtpClientBuilder {
            addr: if hostname.as_ref().contains(':') {
                format!("[{}]:{}", hostname.as_ref(), port)
            } else {
                format!("{}:{}", hostname.as_ref(), port)
            },
            timeout: Duration::from_secs(60),
            tls_connector: build_tls_connector(false),
            tls_hostname: hostname,
            tls: TlsMode::None,
            credentials: None,
            local_host: gethostname::gethostname()
                .to_str()
                .unwrap_or("[127.0.0.1]")
                .to_string(),
        }
    }

    /// Allow invalid TLS certificates
    pub fn allow_invalid_certs(mut self) -> Self {
        self.tls_connector = build_tls_connector(true);
        self
    }

    /// Secure the connection with STARTTLS, implicit TLS or not at all
    pub fn tls(mut self, tls: TlsMode) -> Self {
        self.tls = tls;
        self
    }

    /// Authenticate with these credentials once connected
    pub fn credentials(mut self, credentials: impl Into<Credentials<T>>) -> Self {
        self.credentials = Some(credentials.into());
        self
    }

    /// Set the EHLO hostname
    pub fn helo_host(mut self, host: impl Into<String>) -> Self {
        self.local_host = host.into();
        self
    }

    /// Sets the SMTP connection timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Connects to the relay and runs the session handshake: greeting, EHLO,
    /// optional TLS negotiation and optional authentication.
    pub async fn connect(&self) -> crate::Result<SmtpClient<SmtpStream>> {
        tokio::time::timeout(self.timeout, async {
            let mut client = SmtpClient {
                stream: SmtpStream::Basic(TcpStream::connect(&self.addr).await?),
                timeout: self.timeout,
            };

            if self.tls == TlsMode::Implicit {
                client = client
                    .into_tls(&self.tls_connector, self.tls_hostname.as_ref())
                    .await?;
            }

            // Read greeting
            client.read().await?.assert_positive_completion()?;

            let mut capabilities = client.ehlo(&self.local_host).await?;
            if self.tls == TlsMode::StartTls {
                if !capabilities.has_capability(EXT_START_TLS) {
                    return Err(crate::Error::MissingStartTls);
                }
                client = client
                    .start_tls(&self.tls_connector, self.tls_hostname.as_ref())
                    .await?;
                // Capabilities may change once the channel is secure
                capabilities = client.ehlo(&self.local_host).await?;
            }

            if let Some(credentials) = &self.credentials {
                client.authenticate(credentials, &capabilities).await?;
            }

            Ok(client)
        })
        .await
        .map_err(|_| crate::Error::Timeout)?
    }
}
