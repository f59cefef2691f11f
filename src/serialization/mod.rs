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

//! Pluggable serialization formats.
//!
//! This module provides the [`Serializer`] trait and its registered
//! implementations:
//!
//! - [`JsonSerializer`]: self-describing, human-readable; always used for
//!   the connection prelude and the default for everything else.
//! - [`PostcardSerializer`]: compact binary.
//! - [`TlvSerializer`]: tag-length-value binary with auto-shrinking
//!   integers.
//!
//! [`WireFormat`] is the closed registry over these formats used during
//! per-connection codec negotiation.

pub mod error;
pub mod format;
pub mod json;
pub mod postcard;
pub mod tlv;
pub mod traits;

pub use error::{DeserializationError, SerializationError};
pub use format::{JSON_FORMAT, POSTCARD_FORMAT, TLV_FORMAT, WireFormat};
pub use json::JsonSerializer;
pub use postcard::PostcardSerializer;
pub use tlv::TlvSerializer;
pub use traits::Serializer;
