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

#![doc = include_str!("../README.md")]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod call;
pub mod channel;
pub mod codec;
pub mod context;
pub mod error;
pub mod framing;
pub mod interceptor;
pub mod metadata;
pub mod observability;
pub mod server;
pub mod service;
pub mod status;
pub mod streaming;

pub use channel::{Channel, ChannelConfig, Endpoint};
pub use context::Context;
pub use error::Error;
pub use metadata::Metadata;
pub use server::{Server, ServerConfig};
pub use service::{MethodDescriptor, RpcShape, ServiceDescriptor};
pub use status::{Code, Status};
