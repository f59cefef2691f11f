//
// Copyright 2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Serialization error types.
//!
//! Both error types carry a message and an optional boxed source error so
//! format implementations can attach whatever their backing library reports.

use std::fmt;

/// Error that occurs when serializing a value to bytes.
#[derive(Debug)]
pub struct SerializationError {
    message: String,
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl SerializationError {
    /// Creates a new serialization error with a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new serialization error with a message and source.
    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

impl fmt::Display for SerializationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "serialization error: {}", self.message)?;
        if let Some(source) = &self.source {
            write!(f, " (caused by: {})", source)?;
        }
        Ok(())
    }
}

impl std::error::Error for SerializationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl From<serde_json::Error> for SerializationError {
    fn from(error: serde_json::Error) -> Self {
        Self::with_source("JSON serialization failed", error)
    }
}

/// Error that occurs when deserializing bytes into a value.
#[derive(Debug)]
pub struct DeserializationError {
    message: String,
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl DeserializationError {
    /// Creates a new deserialization error with a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new deserialization error with a message and source.
    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

impl fmt::Display for DeserializationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "deserialization error: {}", self.message)?;
        if let Some(source) = &self.source {
            write!(f, " (caused by: {})", source)?;
        }
        Ok(())
    }
}

impl std::error::Error for DeserializationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl From<serde_json::Error> for DeserializationError {
    fn from(error: serde_json::Error) -> Self {
        Self::with_source("JSON deserialization failed", error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;
    use std::io;

    #[test]
    fn test_serialization_error_display() {
        let error = SerializationError::new("bad value");
        assert!(error.to_string().contains("bad value"));
        assert!(error.source().is_none());
    }

    #[test]
    fn test_serialization_error_with_source() {
        let io_error = io::Error::new(io::ErrorKind::Other, "inner");
        let error = SerializationError::with_source("write failed", io_error);
        assert!(error.to_string().contains("write failed"));
        assert!(error.to_string().contains("inner"));
        assert!(error.source().is_some());
    }

    #[test]
    fn test_deserialization_error_with_source() {
        let io_error = io::Error::new(io::ErrorKind::UnexpectedEof, "eof");
        let error = DeserializationError::with_source("read failed", io_error);
        assert!(error.source().is_some());
    }
}
