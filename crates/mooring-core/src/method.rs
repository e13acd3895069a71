use smol_str::SmolStr;

/// SIP request methods the registration engine sends or observes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    Register,
    Options,
    Unknown(SmolStr),
}

impl Method {
    /// Returns the canonical uppercase string representation for this method.
    pub fn as_str(&self) -> &str {
        match self {
            Method::Register => "REGISTER",
            Method::Options => "OPTIONS",
            Method::Unknown(token) => token.as_str(),
        }
    }

    /// Parses a method token, returning Unknown for extension methods.
    pub fn from_token(token: &str) -> Self {
        if token.eq_ignore_ascii_case("REGISTER") {
            Method::Register
        } else if token.eq_ignore_ascii_case("OPTIONS") {
            Method::Options
        } else {
            Method::Unknown(SmolStr::new(token.to_owned()))
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
