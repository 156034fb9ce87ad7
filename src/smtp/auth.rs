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

use std::fmt::Display;

use base64::{engine::general_purpose::STANDARD, Engine};
use smtp_proto::{EhloResponse, AUTH_LOGIN, AUTH_PLAIN};
#[cfg(feature = "cram-md5")]
use smtp_proto::AUTH_CRAM_MD5;
#[cfg(feature = "digest-md5")]
use smtp_proto::AUTH_DIGEST_MD5;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::SmtpClient;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Credentials<T: AsRef<str>> {
    username: T,
    secret: T,
}

impl<T: AsRef<str>> From<(T, T)> for Credentials<T> {
    fn from(credentials: (T, T)) -> Self {
        Credentials {
            username: credentials.0,
            secret: credentials.1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    InvalidChallenge,
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidChallenge => write!(f, "Invalid challenge received"),
        }
    }
}

/// Authentication mechanism, ordered from most to least preferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Mechanism {
    /// Challenge-Response Authentication Mechanism (CRAM)
    #[cfg(feature = "cram-md5")]
    CramMD5 = 2,

    /// Digest MD5
    #[cfg(feature = "digest-md5")]
    DigestMD5 = 3,

    /// Login
    Login = 4,

    /// Plain
    Plain = 5,
}

impl Mechanism {
    /// Mechanisms advertised in an EHLO response that can be used with a
    /// username and password, most preferred first.
    pub fn supported_by(mechanisms: u64) -> Vec<Mechanism> {
        let mut supported = Vec::with_capacity(4);
        #[cfg(feature = "cram-md5")]
        if mechanisms & AUTH_CRAM_MD5 != 0 {
            supported.push(Mechanism::CramMD5);
        }
        #[cfg(feature = "digest-md5")]
        if mechanisms & AUTH_DIGEST_MD5 != 0 {
            supported.push(Mechanism::DigestMD5);
        }
        if mechanisms & AUTH_LOGIN != 0 {
            supported.push(Mechanism::Login);
        }
        if mechanisms & AUTH_PLAIN != 0 {
            supported.push(Mechanism::Plain);
        }
        supported.sort_unstable();
        supported
    }
}

impl Display for Mechanism {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mechanism::Plain => write!(f, "PLAIN"),
            Mechanism::Login => write!(f, "LOGIN"),
            #[cfg(feature = "digest-md5")]
            Mechanism::DigestMD5 => write!(f, "DIGEST-MD5"),
            #[cfg(feature = "cram-md5")]
            Mechanism::CramMD5 => write!(f, "CRAM-MD5"),
        }
    }
}

impl<T: AsyncRead + AsyncWrite + Unpin> SmtpClient<T> {
    /// Authenticates with the strongest mechanism both sides support.
    pub async fn authenticate<U: AsRef<str>>(
        &mut self,
        credentials: &Credentials<U>,
        capabilities: &EhloResponse<String>,
    ) -> crate::Result<&mut Self> {
        let mut has_err = None;

        for mechanism in Mechanism::supported_by(capabilities.auth_mechanisms) {
            match self.auth(mechanism, credentials).await {
                Ok(_) => return Ok(self),
                Err(crate::Error::UnexpectedReply(reply)) => {
                    // 535: credentials rejected, other mechanisms will not help
                    let rejected = reply.code() == 535;
                    has_err = Some(reply);
                    if rejected {
                        break;
                    }
                }
                Err(err) => return Err(err),
            }
        }

        if let Some(reply) = has_err {
            Err(crate::Error::AuthenticationFailed(reply))
        } else {
            Err(crate::Error::UnsupportedAuthMechanism)
        }
    }

    async fn auth<U: AsRef<str>>(
        &mut self,
        mechanism: Mechanism,
        credentials: &Credentials<U>,
    ) -> crate::Result<()> {
        let mut reply = if mechanism == Mechanism::Plain {
            self.cmd(format!("AUTH {} {}\r\n", mechanism, credentials.encode(mechanism, "")?))
                .await?
        } else {
            self.cmd(format!("AUTH {}\r\n", mechanism)).await?
        };

        for _ in 0..3 {
            match reply.code() {
                334 => {
                    reply = self
                        .cmd(format!(
                            "{}\r\n",
                            credentials.encode(mechanism, reply.message().trim())?
                        ))
                        .await?;
                }
                235 => {
                    return Ok(());
                }
                _ => return Err(crate::Error::UnexpectedReply(reply)),
            }
        }

        Err(crate::Error::UnexpectedReply(reply))
    }
}

impl<T: AsRef<str>> Credentials<T> {
    /// Creates a new `Credentials` instance.
    pub fn new(username: T, secret: T) -> Credentials<T> {
        Credentials { username, secret }
    }

    pub(crate) fn encode(&self, mechanism: Mechanism, challenge: &str) -> crate::Result<String> {
        let username = self.username.as_ref();
        let secret = self.secret.as_ref();

        Ok(STANDARD.encode(
            match mechanism {
                Mechanism::Plain => {
                    format!("\u{0}{}\u{0}{}", username, secret)
                }

                Mechanism::Login => {
                    let challenge = STANDARD.decode(challenge)?;

                    if b"user name"
                        .eq_ignore_ascii_case(challenge.get(0..9).ok_or(Error::InvalidChallenge)?)
                        || b"username".eq_ignore_ascii_case(
                            // Because Google makes its own standards
                            challenge.get(0..8).ok_or(Error::InvalidChallenge)?,
                        )
                    {
                        username
                    } else if b"password"
                        .eq_ignore_ascii_case(challenge.get(0..8).ok_or(Error::InvalidChallenge)?)
                    {
                        secret
                    } else {
                        return Err(Error::InvalidChallenge.into());
                    }
                    .to_string()
                }

                #[cfg(feature = "digest-md5")]
                Mechanism::DigestMD5 => {
                    let mut buf = Vec::with_capacity(10);
                    let mut key = None;
                    let mut in_quote = false;
                    let mut values = std::collections::HashMap::new();
                    let challenge = STANDARD.decode(challenge)?;
                    let challenge_len = challenge.len();

                    for (pos, byte) in challenge.into_iter().enumerate() {
                        let add_key = match byte {
                            b'=' if !in_quote => {
                                if key.is_none() && !buf.is_empty() {
                                    key = String::from_utf8_lossy(&buf).into_owned().into();
                                    buf.clear();
                                } else {
                                    return Err(Error::InvalidChallenge.into());
                                }
                                false
                            }
                            b',' if !in_quote => true,
                            b'"' => {
                                in_quote = !in_quote;
                                false
                            }
                            _ => {
                                buf.push(byte);
                                false
                            }
                        };

                        if add_key || pos == challenge_len - 1 {
                            if let Some(key) = key.take() {
                                values.insert(key, String::from_utf8_lossy(&buf).into_owned());
                            }
                            buf.clear();
                        }
                    }

                    let realm = values.get("realm").map(String::as_str).unwrap_or_default();
                    let digest_uri = format!(
                        "smtp/{}",
                        if realm.is_empty() { "localhost" } else { realm }
                    );

                    #[allow(unused_variables)]
                    let cnonce = {
                        use rand::RngCore;
                        let mut buf = [0u8; 16];
                        rand::thread_rng().fill_bytes(&mut buf);
                        STANDARD.encode(buf)
                    };

                    #[cfg(test)]
                    let cnonce = "OA6MHXh6VqTrRk".to_string();
                    let nonce = values.get("nonce").map(String::as_str).unwrap_or_default();
                    let qop = values.get("qop").map(String::as_str).unwrap_or("auth");
                    let charset = values.get("charset").map(String::as_str).unwrap_or("utf-8");

                    // A1 = H(user:realm:secret):nonce:cnonce
                    let mut a1 = md5::compute(format!("{username}:{realm}:{secret}").as_bytes())
                        .0
                        .to_vec();
                    a1.extend_from_slice(format!(":{nonce}:{cnonce}").as_bytes());
                    let a2 = md5::compute(format!("AUTHENTICATE:{digest_uri}").as_bytes());

                    format!(
                        concat!(
                            "charset={},username=\"{}\",realm=\"{}\",nonce=\"{}\",nc=00000001,",
                            "cnonce=\"{}\",digest-uri=\"{}\",response={:x},qop={}"
                        ),
                        charset,
                        username,
                        realm,
                        nonce,
                        cnonce,
                        digest_uri,
                        md5::compute(
                            format!(
                                "{:x}:{}:00000001:{}:{}:{:x}",
                                md5::compute(&a1),
                                nonce,
                                cnonce,
                                qop,
                                a2
                            )
                            .as_bytes()
                        ),
                        qop
                    )
                }

                #[cfg(feature = "cram-md5")]
                Mechanism::CramMD5 => {
                    let mut secret_opad: Vec<u8> = vec![0x5c; 64];
                    let mut secret_ipad: Vec<u8> = vec![0x36; 64];

                    if secret.len() < 64 {
                        for (pos, byte) in secret.as_bytes().iter().enumerate() {
                            secret_opad[pos] = *byte ^ 0x5c;
                            secret_ipad[pos] = *byte ^ 0x36;
                        }
                    } else {
                        for (pos, byte) in md5::compute(secret.as_bytes()).iter().enumerate() {
                            secret_opad[pos] = *byte ^ 0x5c;
                            secret_ipad[pos] = *byte ^ 0x36;
                        }
                    }

                    secret_ipad.extend_from_slice(&STANDARD.decode(challenge)?);
                    secret_opad.extend_from_slice(&md5::compute(&secret_ipad).0);

                    format!("{} {:x}", username, md5::compute(&secret_opad))
                }
            }
            .as_bytes(),
        ))
    }
}
