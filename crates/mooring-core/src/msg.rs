// mooring - SIP Registration & Outbound Engine
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

use bytes::Bytes;
use smol_str::SmolStr;

use crate::{headers::Headers, method::Method, uri::SipUri};

const MAX_REASON_LENGTH: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageError {
    InvalidStatusCode { code: u16 },
    ReasonTooLong { max: usize, actual: usize },
    InvalidReason(String),
}

impl std::fmt::Display for MessageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidStatusCode { code } => {
                write!(f, "invalid SIP status code: {} (must be 100-699)", code)
            }
            Self::ReasonTooLong { max, actual } => {
                write!(f, "reason phrase too long (max {}, got {})", max, actual)
            }
            Self::InvalidReason(msg) => write!(f, "invalid reason phrase: {}", msg),
        }
    }
}

impl std::error::Error for MessageError {}

/// First line of a SIP request: `Method SP Request-URI SP SIP-Version CRLF`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    pub method: Method,
    pub uri: SipUri,
}

impl RequestLine {
    /// Creates a request line for the given method and target URI.
    ///
    /// The serialized form always carries SIP/2.0.
    pub fn new(method: Method, uri: SipUri) -> Self {
        Self { method, uri }
    }

    /// Returns the request method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the request URI.
    pub fn uri(&self) -> &SipUri {
        &self.uri
    }
}

/// First line of a SIP response: `SIP-Version SP Status-Code SP Reason-Phrase CRLF`.
///
/// The status code must be in the SIP range (100-699) and the reason phrase
/// must not smuggle control characters into serialized output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    pub code: u16,
    pub reason: SmolStr,
}

impl StatusLine {
    /// Creates a status line with the provided code and reason phrase.
    ///
    /// # Errors
    ///
    /// Returns an error if the code is outside 100-699, or the reason phrase
    /// contains control characters or exceeds the length limit.
    pub fn new(code: u16, reason: impl AsRef<str>) -> Result<Self, MessageError> {
        if !(100..=699).contains(&code) {
            return Err(MessageError::InvalidStatusCode { code });
        }

        let reason = reason.as_ref();
        if reason.len() > MAX_REASON_LENGTH {
            return Err(MessageError::ReasonTooLong {
                max: MAX_REASON_LENGTH,
                actual: reason.len(),
            });
        }
        if reason.chars().any(|c| c.is_control()) {
            return Err(MessageError::InvalidReason(
                "control characters not allowed".to_owned(),
            ));
        }

        Ok(Self {
            code,
            reason: SmolStr::new(reason),
        })
    }

    /// Returns the status code.
    pub fn code(&self) -> u16 {
        self.code
    }

    /// Returns true for provisional (1xx) responses.
    pub fn is_provisional(&self) -> bool {
        (100..200).contains(&self.code)
    }

    /// Returns true for 2xx responses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }
}

/// A SIP request: request line, headers, body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub start: RequestLine,
    pub headers: Headers,
    pub body: Bytes,
}

impl Request {
    /// Builds a request from its components.
    pub fn new(start: RequestLine, headers: Headers, body: Bytes) -> Self {
        Self {
            start,
            headers,
            body,
        }
    }

    /// Returns the request method.
    pub fn method(&self) -> &Method {
        &self.start.method
    }

    /// Returns the headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns the CSeq sequence number, when present and well-formed.
    pub fn cseq(&self) -> Option<u32> {
        let value = self.headers.get("CSeq")?;
        value.split_whitespace().next()?.parse().ok()
    }
}

/// A SIP response: status line, headers, body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub start: StatusLine,
    pub headers: Headers,
    pub body: Bytes,
}

impl Response {
    /// Builds a response from its components.
    pub fn new(start: StatusLine, headers: Headers, body: Bytes) -> Self {
        Self {
            start,
            headers,
            body,
        }
    }

    /// Returns the status code.
    pub fn code(&self) -> u16 {
        self.start.code
    }

    /// Returns the headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_line_rejects_out_of_range_codes() {
        assert!(StatusLine::new(99, "Too Low").is_err());
        assert!(StatusLine::new(700, "Too High").is_err());
        assert!(StatusLine::new(200, "OK").is_ok());
    }

    #[test]
    fn status_line_rejects_crlf_injection() {
        assert!(StatusLine::new(200, "OK\r\nInjected: yes").is_err());
    }

    #[test]
    fn status_line_classification() {
        let provisional = StatusLine::new(100, "Trying").unwrap();
        assert!(provisional.is_provisional());
        assert!(!provisional.is_success());

        let ok = StatusLine::new(200, "OK").unwrap();
        assert!(ok.is_success());
    }

    #[test]
    fn request_cseq_extraction() {
        let mut headers = Headers::new();
        headers.push(SmolStr::new("CSeq"), SmolStr::new("7 REGISTER"));
        let req = Request::new(
            RequestLine::new(Method::Register, SipUri::parse("sip:example.com").unwrap()),
            headers,
            Bytes::new(),
        );
        assert_eq!(req.cseq(), Some(7));
    }
}
