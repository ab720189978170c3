use std::fmt;

/// A string paired with a log-safe representation.
///
/// The real value (full URL with credentials, SAS token, ...) is only
/// reachable through [`MaskedString::real`]; `Display` and the default
/// conversions yield the masked form, so accidental logging is safe. When no
/// masked form is given, the value is considered safe and both accessors
/// return it.
#[derive(Clone, PartialEq, Eq)]
pub struct MaskedString {
    real: String,
    masked: Option<String>,
}

impl MaskedString {
    pub fn new<R, M>(real: R, masked: M) -> Self
    where
        R: Into<String>,
        M: Into<String>,
    {
        Self {
            real: real.into(),
            masked: Some(masked.into()),
        }
    }

    pub fn plain<R: Into<String>>(real: R) -> Self {
        Self {
            real: real.into(),
            masked: None,
        }
    }

    pub fn real(&self) -> &str {
        &self.real
    }

    pub fn masked(&self) -> &str {
        self.masked.as_deref().unwrap_or(&self.real)
    }
}

impl From<String> for MaskedString {
    fn from(real: String) -> Self {
        Self::plain(real)
    }
}

impl From<&str> for MaskedString {
    fn from(real: &str) -> Self {
        Self::plain(real)
    }
}

impl fmt::Display for MaskedString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.masked())
    }
}

impl fmt::Debug for MaskedString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MaskedString({:?})", self.masked())
    }
}
