// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::types::MacAddr;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("unknown host: {id}({addr})")]
    UnknownHost { id: String, addr: MacAddr },

    #[error("{src} cannot reach {dst}")]
    PathDiscontinuity { src: String, dst: String },

    #[error("invalid host identifier: {0}")]
    InvalidHostId(String),

    #[error("a trace is already in progress")]
    TraceInProgress,

    #[error("no trace in progress")]
    NoTrace,

    #[error("control channel error: {0}")]
    Channel(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
