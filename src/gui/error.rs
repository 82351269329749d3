use std::{error::Error, fmt::Display};

/// Errors raised by the terminal user interface.
#[derive(Debug)]
pub enum GuiError {
    /// Drawing or reading the terminal failed
    IOError(std::io::Error),
}

impl Display for GuiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#?}", self)
    }
}

impl Error for GuiError {}

impl From<std::io::Error> for GuiError {
    fn from(value: std::io::Error) -> Self {
        Self::IOError(value)
    }
}
