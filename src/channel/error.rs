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

//! Channel layer error types.

use thiserror::Error;

/// Errors from channel lifecycle and subchannel selection.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// No channel is registered under the requested name.
    #[error("channel {0:?} is not defined")]
    Undefined(String),

    /// A channel with this name already exists in the process.
    #[error("channel name {0:?} already registered")]
    DuplicateName(String),

    /// The ready set is empty (or fully leased under the `claim`
    /// balancer).
    #[error("no ready endpoints")]
    NoEndpoints,

    /// The channel was stopped.
    #[error("channel stopped: {reason}")]
    Stopped {
        /// The reason passed to `stop`.
        reason: String,
    },

    /// The resolver produced no endpoints while `sync_start` requires
    /// some.
    #[error("resolver returned no endpoints for {target:?}")]
    EmptyResolution {
        /// The resolution target.
        target: String,
    },
}

impl ChannelError {
    /// Returns `true` if retrying the operation may succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ChannelError::NoEndpoints)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverability() {
        assert!(ChannelError::NoEndpoints.is_recoverable());
        assert!(!ChannelError::Undefined("x".to_string()).is_recoverable());
        assert!(!ChannelError::Stopped {
            reason: "bye".to_string()
        }
        .is_recoverable());
    }

    #[test]
    fn test_display() {
        assert_eq!(
            ChannelError::Undefined("orders".to_string()).to_string(),
            "channel \"orders\" is not defined"
        );
        assert_eq!(ChannelError::NoEndpoints.to_string(), "no ready endpoints");
    }
}
